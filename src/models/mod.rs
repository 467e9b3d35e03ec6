pub mod notification;

// Re-export core models for easy access
pub use notification::{
    generate_message, EntityEvent, EntityOperation, Notification, UnknownOperation,
};
