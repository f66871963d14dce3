fn main() -> Result<(), Box<dyn std::error::Error>> {
    // The registration server is only needed to stand in for the kubelet in tests.
    tonic_build::configure()
        .build_client(true)
        .build_server(true)
        .compile_protos(&["proto/api.proto"], &["proto"])?;
    Ok(())
}
