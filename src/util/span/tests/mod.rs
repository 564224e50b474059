//! Span 单元测试

use crate::util::span::{Position, SourceLocation, Span};

#[test]
fn test_position_display() {
    let pos = Position::new(10, 20);
    assert_eq!(format!("{}", pos), "10:20");
}

#[test]
fn test_span_dummy() {
    assert!(Span::dummy().is_dummy());
    assert!(!Span::new(Position::new(1, 1), Position::new(1, 4)).is_dummy());
}

#[test]
fn test_location_accessors() {
    let loc = SourceLocation::new("ops.py", 3, 8, 3, 14);
    assert_eq!(loc.line(), 3);
    assert_eq!(loc.column(), 8);
    assert_eq!(loc.span.end, Position::new(3, 14));
}

#[test]
fn test_location_display() {
    assert_eq!(SourceLocation::at("ops.py", 7, 2).to_string(), "ops.py:7:2");
    assert_eq!(SourceLocation::at("", 7, 2).to_string(), "<source>:7:2");
    assert_eq!(SourceLocation::dummy().to_string(), "<unknown>");
}
