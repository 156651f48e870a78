pub mod conversation;
pub mod fragment;
pub mod group;
