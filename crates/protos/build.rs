// Path: crates/protos/build.rs
fn main() -> Result<(), Box<dyn std::error::Error>> {
    std::env::set_var(
        "PROTOC",
        protoc_bin_vendored::protoc_bin_path().expect("bundled protoc binary"),
    );
    // The shim protocol, peer messages, and query results live in three
    // proto packages; compile them together so relative imports resolve.
    tonic_build::configure().compile(
        &[
            "proto/chaincode_shim.proto",
            "proto/chaincode.proto",
            "proto/chaincode_event.proto",
            "proto/proposal.proto",
            "proto/proposal_response.proto",
            "proto/common.proto",
            "proto/queryresult.proto",
        ],
        &["proto"],
    )?;

    Ok(())
}
