#![no_main]

use libfuzzer_sys::fuzz_target;
use tagflow_core::config::InstrumentOptions;
use tagflow_core::emit::{emit_program, parse_program_json, SourceInfo};
use tagflow_core::instrument::instrument_program;

fuzz_target!(|data: &[u8]| {
    let data = if data.len() > 64 * 1024 {
        &data[..64 * 1024]
    } else {
        data
    };

    let Ok(program) = parse_program_json(data) else {
        return;
    };
    let Ok(instrumented) = instrument_program(&program, &InstrumentOptions::default()) else {
        return;
    };

    // Instrumented output must always re-encode and decode.
    let text = emit_program(&instrumented, &SourceInfo::default()).expect("emit instrumented");
    parse_program_json(text.as_bytes()).expect("decode emitted program");
});
