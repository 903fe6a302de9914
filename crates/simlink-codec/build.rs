/// Compile the step protocol schema in "proto/simlink.proto".
///
/// A vendored `protoc` is used unless the environment already points
/// `PROTOC` at one.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    if std::env::var_os("PROTOC").is_none() {
        let protoc = protoc_bin_vendored::protoc_bin_path()
            .map_err(|e| format!("no vendored protoc for this host: {e:?}"))?;
        std::env::set_var("PROTOC", protoc);
    }
    println!("cargo:rerun-if-changed=proto/simlink.proto");
    tonic_build::compile_protos("proto/simlink.proto")?;
    Ok(())
}
