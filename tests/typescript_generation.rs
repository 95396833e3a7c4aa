//! TypeScript Generation Tests
//!
//! Validates that the public data types can be exported to TypeScript when the
//! tauri feature is enabled.

#[cfg(feature = "tauri")]
#[test]
fn test_core_types_implement_specta_type() {
    use specta::Type;

    fn assert_type<T: Type>() {}

    // Frame data
    assert_type::<cranelink::TrackingFrame>();
    assert_type::<cranelink::types::Timecode>();
    assert_type::<cranelink::types::FrameRate>();
    assert_type::<cranelink::UpdateRate>();

    // Health and adapters
    assert_type::<cranelink::ConnectionState>();
    assert_type::<cranelink::BridgeStatus>();
    assert_type::<cranelink::publisher::PublisherStats>();
    assert_type::<cranelink::adapters::CameraPose>();
}

#[cfg(not(feature = "tauri"))]
#[test]
fn test_tauri_feature_disabled() {
    // Types still compile without specta::Type
    let _ = cranelink::UpdateRate::Native;
    let _ = cranelink::ConnectionState::default();
}
