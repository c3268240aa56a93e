fn main() -> Result<(), Box<dyn std::error::Error>> {
  println!("cargo:rerun-if-changed=proto/csi.proto");

  tonic_build::configure()
    .build_client(false)
    .build_server(true)
    .compile(&["proto/csi.proto"], &["proto"])?;

  Ok(())
}
