fn main() -> Result<(), Box<dyn std::error::Error>> {
    tonic_build::configure()
        .build_server(true) // The stub renderer
        .build_client(true)
        .compile_protos(&["proto/renderlink.proto"], &["proto/"])?;
    Ok(())
}
