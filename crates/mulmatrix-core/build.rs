/// Generates the gRPC client and server stubs for the `mulmatrix.Worker`
/// service.
///
/// The service is described with `tonic-build`'s manual builder rather than a
/// `.proto` file, so building the workspace does not require `protoc`. The
/// message types live in `src/proto.rs` as hand-written `prost` messages and
/// the stubs are wired to them through their fully-qualified paths.
///
/// # Output
///
/// The generated code lands in `OUT_DIR/mulmatrix.Worker.rs` and is included
/// by the `proto` module:
///
/// ```rust,ignore
/// include!(concat!(env!("OUT_DIR"), "/mulmatrix.Worker.rs"));
/// ```
fn main() {
    let mul_row = tonic_build::manual::Method::builder()
        .name("mul_row")
        .route_name("MulRow")
        .input_type("crate::proto::MulRowRequest")
        .output_type("crate::proto::MulRowReply")
        .codec_path("tonic_prost::ProstCodec")
        .build();

    let worker = tonic_build::manual::Service::builder()
        .name("Worker")
        .package("mulmatrix")
        .method(mul_row)
        .build();

    tonic_build::manual::Builder::new().compile(&[worker]);

    println!("cargo:rerun-if-changed=build.rs");
}
