//! Batch ordering check, run before anything in a batch is written.

use sluice_core::{Event, EventId};

use crate::error::LoadError;

/// Highest id of a batch whose ids strictly increase from `after_id`.
///
/// Fails on the first id that is not greater than its predecessor (ties
/// included). An empty batch returns `after_id`.
pub fn max_id(events: &[Event], after_id: EventId, source_name: &str) -> Result<EventId, LoadError> {
    let mut previous = after_id;
    for event in events {
        if event.id() <= previous {
            return Err(LoadError::OutOfOrder {
                source_name: source_name.to_string(),
                previous_id: previous,
                current_id: event.id(),
            });
        }
        previous = event.id();
    }
    Ok(previous)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(ids: &[EventId]) -> Vec<Event> {
        ids.iter().copied().map(Event::empty).collect()
    }

    #[test]
    fn test_ascending_batch_returns_last_id() {
        assert_eq!(max_id(&batch(&[10, 11, 15]), 0, "s").unwrap(), 15);
        assert_eq!(max_id(&batch(&[1]), 0, "s").unwrap(), 1);
    }

    #[test]
    fn test_ascending_batches_return_maximum() {
        for len in 1..20 {
            let ids: Vec<EventId> = (0..len).map(|i| 100 + i * 3).collect();
            let expected = *ids.iter().max().unwrap();
            assert_eq!(max_id(&batch(&ids), 99, "s").unwrap(), expected);
        }
    }

    #[test]
    fn test_empty_batch_returns_after_id() {
        assert_eq!(max_id(&[], 42, "s").unwrap(), 42);
    }

    #[test]
    fn test_id_not_above_after_id_is_rejected() {
        let err = max_id(&batch(&[5, 6]), 5, "s").unwrap_err();
        assert!(matches!(
            err,
            LoadError::OutOfOrder { previous_id: 5, current_id: 5, .. }
        ));
    }

    #[test]
    fn test_tie_is_rejected() {
        let err = max_id(&batch(&[1, 2, 2, 3]), 0, "s").unwrap_err();
        assert!(matches!(
            err,
            LoadError::OutOfOrder { previous_id: 2, current_id: 2, .. }
        ));
    }

    #[test]
    fn test_decrease_is_rejected() {
        let err = max_id(&batch(&[1, 3, 2]), 0, "orders").unwrap_err();
        match err {
            LoadError::OutOfOrder { source_name, previous_id, current_id } => {
                assert_eq!(source_name, "orders");
                assert_eq!(previous_id, 3);
                assert_eq!(current_id, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_any_adjacent_violation_is_rejected() {
        let base: Vec<EventId> = (1..=10).collect();
        for i in 1..base.len() {
            let mut ids = base.clone();
            ids[i] = ids[i - 1];
            assert!(max_id(&batch(&ids), 0, "s").is_err(), "tie at {i}");
            ids[i] = ids[i - 1] - 1;
            assert!(max_id(&batch(&ids), 0, "s").is_err(), "decrease at {i}");
        }
    }
}
