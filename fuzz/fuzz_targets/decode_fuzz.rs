#![no_main]
use deltafs::vcdiff::decode_in_memory;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Errors are fine; panics are not.
    let _ = decode_in_memory(data, &[]);

    if data.len() >= 2 {
        let (source, delta) = data.split_at(data.len() / 2);
        let _ = decode_in_memory(delta, source);
    }
});
