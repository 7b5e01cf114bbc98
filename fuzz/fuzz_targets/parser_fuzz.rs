//! Parser fuzz target: feed arbitrary bytes to the protocol file parser and
//! compile every protocol it accepts. Nothing may panic; malformed input
//! must come back as a ProtocolError.
//! Build with: cargo fuzz run parser_fuzz (requires nightly and cargo fuzz).

#![cfg_attr(fuzzing, no_main)]

#[cfg(fuzzing)]
use libfuzzer_sys::fuzz_target;

#[cfg(fuzzing)]
fuzz_target!(|data: &[u8]| {
    use streamproto::{Backend, BasicDevice, ProtocolRequest, StdFormats};

    let file = match streamproto::parser::parse_bytes(data, "fuzz.proto") {
        Ok(f) => f,
        Err(_) => return,
    };
    let device = BasicDevice::new().with_field("x", vec![0]);
    let backend = Backend::new(&device, &StdFormats).with_fields(&device);
    for template in &file.protocols {
        let request = match ProtocolRequest::parse(&format!("{}(1,a,\"q\")", template.name)) {
            Ok(r) => r,
            Err(_) => continue,
        };
        let mut instance = template.instantiate(&request);
        if let Ok(compiled) = instance.compile(&backend) {
            let _ = streamproto::instruction::encode(&compiled.body);
        }
    }
});

#[cfg(not(fuzzing))]
fn main() {
    eprintln!("Build with: cargo fuzz run parser_fuzz");
}
