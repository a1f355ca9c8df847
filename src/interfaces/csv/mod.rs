//! CSV batch input and output for the `payrail` binary.

pub mod recipient_reader;
pub mod request_reader;
pub mod response_writer;
