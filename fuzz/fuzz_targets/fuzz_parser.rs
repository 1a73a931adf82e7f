#![no_main]

use libfuzzer_sys::fuzz_target;
use skiff::parser::{FeedResult, ReadState, Role};

fuzz_target!(|data: &[u8]| {
    for role in [Role::Server, Role::Client] {
        let mut state = ReadState::new(role);
        if let Ok(FeedResult::Complete(n)) = state.feed(data, false) {
            let _ = state.resolve(&data[..n]);
        }
    }
});
