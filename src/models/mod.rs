pub mod activity;
pub mod event;
