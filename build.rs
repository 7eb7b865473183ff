use tonic_build::manual::{Builder, Method, Service};

const PACKAGE: &str = "stakesign.v1";
const CODEC: &str = "tonic::codec::ProstCodec";

fn method(name: &str, route: &str, input: &str, output: &str) -> Method {
    Method::builder()
        .name(name)
        .route_name(route)
        .input_type(format!("crate::api::messages::{}", input))
        .output_type(format!("crate::api::messages::{}", output))
        .codec_path(CODEC)
        .build()
}

fn main() {
    // Messages are hand-written prost structs, so only the service glue is
    // generated and no protoc is needed.
    let signer = Service::builder()
        .name("Signer")
        .package(PACKAGE)
        .method(method("sign", "Sign", "SignRequest", "SignResponse"))
        .method(method(
            "sign_beacon_attestation",
            "SignBeaconAttestation",
            "SignBeaconAttestationRequest",
            "SignResponse",
        ))
        .method(method(
            "sign_beacon_proposal",
            "SignBeaconProposal",
            "SignBeaconProposalRequest",
            "SignResponse",
        ))
        .build();

    let lister = Service::builder()
        .name("Lister")
        .package(PACKAGE)
        .method(method(
            "list_accounts",
            "ListAccounts",
            "ListAccountsRequest",
            "ListAccountsResponse",
        ))
        .build();

    let account_manager = Service::builder()
        .name("AccountManager")
        .package(PACKAGE)
        .method(method(
            "lock",
            "Lock",
            "LockAccountRequest",
            "AccountManagerResponse",
        ))
        .method(method(
            "unlock",
            "Unlock",
            "UnlockAccountRequest",
            "AccountManagerResponse",
        ))
        .build();

    Builder::new()
        .build_client(false)
        .compile(&[signer, lister, account_manager]);

    println!("cargo:rerun-if-changed=build.rs");
}
