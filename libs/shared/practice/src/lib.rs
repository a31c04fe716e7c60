pub mod client;

pub use client::PracticeClient;
