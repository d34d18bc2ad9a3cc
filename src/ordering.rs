//! Manual ordering shared by menu sections and menu items.

use std::collections::HashMap;

use uuid::Uuid;

use crate::error::StoreError;

/// A row ranked by an integer `position` inside its parent scope.
pub trait Positioned: Clone {
    fn id(&self) -> Uuid;
    fn set_position(&mut self, position: i32);
}

/// Rebuilds `current` in the order given by `ordered_ids` and assigns
/// `position = index` to every row.
///
/// `ordered_ids` must name every row of `current` exactly once.
pub fn reorder_by_ids<T: Positioned>(current: &[T], ordered_ids: &[Uuid]) -> Result<Vec<T>, StoreError> {
    if ordered_ids.len() != current.len() {
        return Err(StoreError::Validation(format!(
            "expected {} ids, got {}",
            current.len(),
            ordered_ids.len()
        )));
    }

    let mut by_id: HashMap<Uuid, &T> = current.iter().map(|row| (row.id(), row)).collect();
    let mut out = Vec::with_capacity(current.len());
    for (index, id) in ordered_ids.iter().enumerate() {
        let row = by_id
            .remove(id)
            .ok_or_else(|| StoreError::Validation(format!("unknown or repeated id {id}")))?;
        let mut row = row.clone();
        row.set_position(index as i32);
        out.push(row);
    }
    Ok(out)
}

/// `(id, position)` pairs for a bulk position write.
pub fn position_updates<T: Positioned>(rows: &[T]) -> Vec<(Uuid, i32)> {
    rows.iter()
        .enumerate()
        .map(|(index, row)| (row.id(), index as i32))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Row {
        id: Uuid,
        position: i32,
    }

    impl Positioned for Row {
        fn id(&self) -> Uuid {
            self.id
        }
        fn set_position(&mut self, position: i32) {
            self.position = position;
        }
    }

    fn rows(n: usize) -> Vec<Row> {
        (0..n)
            .map(|i| Row {
                id: Uuid::new_v4(),
                position: i as i32,
            })
            .collect()
    }

    #[test]
    fn reversed_order_gets_dense_positions() {
        let current = rows(5);
        let ids: Vec<Uuid> = current.iter().rev().map(|r| r.id).collect();
        let out = reorder_by_ids(&current, &ids).unwrap();
        let got: Vec<(Uuid, i32)> = out.iter().map(|r| (r.id, r.position)).collect();
        let want: Vec<(Uuid, i32)> = ids.iter().enumerate().map(|(i, id)| (*id, i as i32)).collect();
        assert_eq!(got, want);
    }

    #[test]
    fn sparse_positions_are_compacted() {
        let mut current = rows(3);
        current[0].position = 4;
        current[1].position = 9;
        current[2].position = 17;
        let ids: Vec<Uuid> = current.iter().map(|r| r.id).collect();
        let out = reorder_by_ids(&current, &ids).unwrap();
        assert_eq!(out.iter().map(|r| r.position).collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[test]
    fn rejects_missing_unknown_and_repeated_ids() {
        let current = rows(3);
        let short = vec![current[0].id, current[1].id];
        assert!(matches!(reorder_by_ids(&current, &short), Err(StoreError::Validation(_))));

        let unknown = vec![current[0].id, current[1].id, Uuid::new_v4()];
        assert!(matches!(reorder_by_ids(&current, &unknown), Err(StoreError::Validation(_))));

        let repeated = vec![current[0].id, current[0].id, current[1].id];
        assert!(matches!(reorder_by_ids(&current, &repeated), Err(StoreError::Validation(_))));
    }

    #[test]
    fn empty_scope_is_fine() {
        let out = reorder_by_ids::<Row>(&[], &[]).unwrap();
        assert!(out.is_empty());
        assert!(position_updates::<Row>(&[]).is_empty());
    }

    #[test]
    fn position_updates_follow_slice_order() {
        let current = rows(4);
        let updates = position_updates(&current);
        for (i, (id, pos)) in updates.iter().enumerate() {
            assert_eq!(*id, current[i].id);
            assert_eq!(*pos, i as i32);
        }
    }
}
