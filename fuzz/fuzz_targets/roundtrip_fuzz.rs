#![no_main]
use deltafs::vcdiff::{decode_in_memory, encode_in_memory};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() < 3 {
        return;
    }

    // First byte picks the split, second the input chunk size.
    let split = data[0] as usize * (data.len() - 2) / 255;
    let chunk = 1 + data[1] as usize * 64;
    let (source, target) = data[2..].split_at(split);

    let delta = encode_in_memory(source, target, chunk);
    let decoded = decode_in_memory(&delta, source).unwrap();
    assert_eq!(decoded, target);
});
