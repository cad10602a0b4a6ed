#![allow(dead_code)]

pub mod mock_advisor;
pub mod recording_sink;
