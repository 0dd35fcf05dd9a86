//! Scenarios behind the `telelog` binary: following a file and loading
//! recipient lists.

mod test_recipient_files;
mod test_tail_forwarding;
