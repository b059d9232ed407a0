//! gRPC server module for the Gatekeeper service.

mod server;
mod service;

pub use server::GrpcServer;
pub use service::GatekeeperService;

// Include the generated protobuf code
pub mod proto {
    pub mod gatekeeper {
        pub mod v1 {
            tonic::include_proto!("gatekeeper.v1");
        }
    }
}

// Re-export commonly used types
pub use proto::gatekeeper::v1::{
    gatekeeper_server::GatekeeperServer, CheckAttemptRequest, CheckAttemptResponse, KeyRequest,
};
