use tonic_build::manual::{Builder, Method, Service};

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Messages are declared with prost derives in src/grpc/proto.rs, so the
    // service is described by hand instead of compiling a .proto file.
    let codec = "tonic::codec::ProstCodec";

    let throttle = Service::builder()
        .name("Throttle")
        .package("throttled.v1")
        .method(
            Method::builder()
                .name("attempt")
                .route_name("Attempt")
                .input_type("crate::grpc::proto::AttemptRequest")
                .output_type("crate::grpc::proto::Decision")
                .codec_path(codec)
                .build(),
        )
        .method(
            Method::builder()
                .name("check")
                .route_name("Check")
                .input_type("crate::grpc::proto::CheckRequest")
                .output_type("crate::grpc::proto::Decision")
                .codec_path(codec)
                .build(),
        )
        .method(
            Method::builder()
                .name("record")
                .route_name("Record")
                .input_type("crate::grpc::proto::RecordRequest")
                .output_type("crate::grpc::proto::RecordResponse")
                .codec_path(codec)
                .build(),
        )
        .build();

    Builder::new().compile(&[throttle]);
}
