//! Proptest strategies for notification inputs

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use notification_pipeline::{EntityEvent, EntityOperation, LocalNotificationStore, Notification};
use proptest::prelude::*;

/// Non-blank identifier-like strings
pub fn entity_type_strategy() -> impl Strategy<Value = String> {
    "[A-Z][a-zA-Z]{0,15}"
}

pub fn entity_id_strategy() -> impl Strategy<Value = String> {
    "[0-9]{1,6}"
}

/// Display names, including blank ones that fall back to the id
pub fn display_name_strategy() -> impl Strategy<Value = Option<String>> {
    prop::option::of(prop_oneof![
        Just(String::new()),
        Just("   ".to_string()),
        "[a-zA-Z0-9 ,.'-]{1,40}",
    ])
}

pub fn operation_strategy() -> impl Strategy<Value = EntityOperation> {
    prop_oneof![
        Just(EntityOperation::Create),
        Just(EntityOperation::Update),
        Just(EntityOperation::Delete),
        "[A-Z]{3,10}".prop_map(|raw| EntityOperation::from(raw.as_str())),
    ]
}

pub fn entity_event_strategy() -> impl Strategy<Value = EntityEvent> {
    (
        entity_type_strategy(),
        entity_id_strategy(),
        display_name_strategy(),
        operation_strategy(),
        prop::option::of("[a-z]{1,12}"),
    )
        .prop_map(|(entity_type, entity_id, display_name, operation, created_by)| {
            EntityEvent {
                entity_type,
                entity_id,
                entity_display_name: display_name,
                operation,
                created_by,
            }
        })
}

/// Whole-second timestamps within a few years
pub fn timestamp_strategy() -> impl Strategy<Value = DateTime<Utc>> {
    (1_500_000_000i64..1_900_000_000).prop_map(|secs| Utc.timestamp_opt(secs, 0).unwrap())
}

/// Notifications with and without ids; read ones are marked through a store
pub fn notification_strategy() -> impl Strategy<Value = Notification> {
    (
        entity_event_strategy(),
        timestamp_strategy(),
        prop::option::of(1i64..1_000_000),
        any::<bool>(),
    )
        .prop_map(|(event, created_at, id, is_read)| {
            let mut notification = Notification::from_event(event, created_at).unwrap();
            if is_read {
                let store = LocalNotificationStore::new();
                let stored = store.append(notification).unwrap();
                assert!(store.mark_read(stored.id().unwrap()));
                notification = store.list(None).remove(0);
            }
            match id {
                Some(id) => notification.with_id(id),
                None => notification,
            }
        })
}

/// Second offsets for a scripted clock; small range so ties are common
pub fn clock_offsets_strategy() -> impl Strategy<Value = Vec<i64>> {
    prop::collection::vec(0i64..5, 0..30)
}
