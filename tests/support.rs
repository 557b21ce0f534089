#![allow(dead_code)]

use std::sync::Arc;

use tokio::io::DuplexStream;

use sunrpc::protocol::rpc::{ClientCodec, ProcedureId, ProcedureRegistry, ServerCodec};
use sunrpc::{DeserializeStruct, SerializeStruct};

pub const ARITH_PROGRAM: u32 = 12345;
pub const ARITH_VERSION: u32 = 1;
pub const ADD: ProcedureId = ProcedureId::new(ARITH_PROGRAM, ARITH_VERSION, 1);
pub const MULTIPLY: ProcedureId = ProcedureId::new(ARITH_PROGRAM, ARITH_VERSION, 2);

/// Arguments of the arithmetic procedures.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Args {
    pub a: i32,
    pub b: i32,
}
SerializeStruct!(Args, a, b);
DeserializeStruct!(Args, a, b);

pub fn arith_registry() -> Arc<ProcedureRegistry> {
    let registry = ProcedureRegistry::new();
    registry.register(ADD, "Arith.Add").expect("register Arith.Add");
    registry.register(MULTIPLY, "Arith.Multiply").expect("register Arith.Multiply");
    Arc::new(registry)
}

/// Client and server codecs joined by an in-memory pipe.
pub fn codec_pair(
    registry: Arc<ProcedureRegistry>,
) -> (ClientCodec<DuplexStream>, ServerCodec<DuplexStream>) {
    let (client_end, server_end) = tokio::io::duplex(256 * 1024);
    let client = ClientCodec::new(client_end, registry.clone()).expect("split duplex");
    let server = ServerCodec::new(server_end, registry);
    (client, server)
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}
