//! Tests for id generators

use prometheus_task_admission::core::TaskId;
use prometheus_task_admission::util::id::{IdGenerator, SequenceGenerator, UuidGenerator};

#[test]
fn test_uuid_ids_are_v4() {
    let id = UuidGenerator.generate();
    assert_eq!(id.get_version_num(), 4);
}

#[test]
fn test_repeating_generator_collides() {
    let id = TaskId::new_v4();
    let gen = SequenceGenerator::repeating(id);
    assert_eq!(gen.generate(), gen.generate());
}

#[test]
fn test_empty_sequence_falls_back_to_random() {
    let gen = SequenceGenerator::new(Vec::new());
    assert_ne!(gen.generate(), gen.generate());
}
