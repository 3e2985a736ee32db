use std::io;

fn main() -> io::Result<()> {
    build_proto()?;
    Ok(())
}

fn build_proto() -> io::Result<()> {
    println!("cargo:rerun-if-changed=protos/raft.proto");

    // Generated code lands in OUT_DIR and is pulled in with `tonic::include_proto!`.
    tonic_build::configure()
        .build_client(true)
        .build_server(true)
        .compile(&["protos/raft.proto"], &["protos/"])
}
