use std::env;
use std::io::Result;
use std::path::PathBuf;

const PROTO: &str = "proto/obs_grpc.proto";

fn main() -> Result<()> {
    let out_dir = PathBuf::from(env::var_os("OUT_DIR").expect("OUT_DIR is set by cargo"));

    println!("cargo:rerun-if-changed={PROTO}");

    // The descriptor set backs server reflection and the JSON CLI.
    tonic_prost_build::configure()
        .file_descriptor_set_path(out_dir.join("obs_grpc_descriptors.bin"))
        .protoc_arg("--experimental_allow_proto3_optional")
        .compile_protos(&[PROTO], &["proto"])
}
