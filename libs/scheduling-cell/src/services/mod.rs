pub mod booking;
pub mod cache;
pub mod conflict;
pub mod directory;
pub mod rules;
pub mod settings;
pub mod slots;
