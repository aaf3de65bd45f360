use std::env;
use std::fs::File;
use std::io::Write;
use std::path::Path;

fn main() {
    println!("cargo:rerun-if-env-changed=HARRIS_QUEUE_REF_COUNT_BITS");

    let out_dir = env::var("OUT_DIR").expect("no out directory");
    let dest = Path::new(&out_dir).join("build_constants.rs");

    let mut file = File::create(&dest).expect("could not create file");

    let bits: u32 = env::var("HARRIS_QUEUE_REF_COUNT_BITS")
        .map_or(Ok(15), |var| var.parse())
        .expect("failed to parse env variable HARRIS_QUEUE_REF_COUNT_BITS");

    // 48 bits are taken by the marker and the (shifted) next pointer and the
    // highest bit is reserved for the reclaimed flag
    if bits == 0 || bits > 15 {
        panic!("invalid HARRIS_QUEUE_REF_COUNT_BITS value ({}), must be in 1..=15", bits);
    }

    write!(&mut file, "const REF_COUNT_BITS: u32 = {};", bits).expect("could not write to file");
}
