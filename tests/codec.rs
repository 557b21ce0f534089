use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use sunrpc::protocol::rpc::{write_record, ClientCodec, RecordConfig, RpcError};
use sunrpc::xdr::rpc::{
    accept_body, accepted_reply, auth_stat, call_body, call_message, make_success_reply,
    mismatch_info, opaque_auth, rejected_reply, reply_body, rpc_body, rpc_msg, CALL, REPLY,
};
use sunrpc::xdr::{to_bytes, Serialize};

mod support;

use support::{arith_registry, codec_pair, init_tracing, Args, ADD, MULTIPLY};

fn accepted(reply_data: accept_body) -> reply_body {
    reply_body::MSG_ACCEPTED(accepted_reply { verf: opaque_auth::default(), reply_data })
}

#[tokio::test]
async fn call_and_reply_round_trip() {
    init_tracing();
    let (client, mut server) = codec_pair(arith_registry());

    client.write_request(42, "Arith.Add", &Args { a: 7, b: 8 }).await.expect("write request");
    assert_eq!(client.pending_calls(), 1);

    let request = server.read_request_header().await.expect("read request header");
    assert_eq!(request.call_id, 42);
    assert_eq!(request.procedure, "Arith.Add");
    assert_eq!(request.id, ADD);
    assert_eq!(request.cred, opaque_auth::default());

    let mut args = Args::default();
    server.read_request_body(Some(&mut args)).await.expect("read request body");
    assert_eq!(args, Args { a: 7, b: 8 });
    server.write_response(42, &(args.a + args.b), None).await.expect("write response");

    let response = client.read_response_header().await.expect("read response header");
    assert_eq!(response.call_id, 42);
    assert_eq!(response.procedure, "Arith.Add");
    assert!(response.result.is_ok(), "{:?}", response.result);

    let mut sum = 0_i32;
    client.read_response_body(Some(&mut sum)).await.expect("read response body");
    assert_eq!(sum, 15);
    assert_eq!(client.pending_calls(), 0);
}

#[tokio::test]
async fn replies_may_arrive_out_of_order() {
    let (client, mut server) = codec_pair(arith_registry());

    client.write_request(1, "Arith.Add", &Args { a: 2, b: 3 }).await.unwrap();
    client.write_request(2, "Arith.Multiply", &Args { a: 2, b: 3 }).await.unwrap();

    let mut requests = Vec::new();
    for _ in 0..2 {
        let header = server.read_request_header().await.unwrap();
        let mut args = Args::default();
        server.read_request_body(Some(&mut args)).await.unwrap();
        requests.push((header, args));
    }
    for (header, args) in requests.iter().rev() {
        let result = match header.id {
            id if id == ADD => args.a + args.b,
            id if id == MULTIPLY => args.a * args.b,
            id => panic!("unexpected procedure {id}"),
        };
        server.write_response(header.call_id, &result, None).await.unwrap();
    }

    let mut results = Vec::new();
    for _ in 0..2 {
        let header = client.read_response_header().await.unwrap();
        header.result.expect("call succeeded");
        let mut value = 0_i32;
        client.read_response_body(Some(&mut value)).await.unwrap();
        results.push((header.call_id, header.procedure, value));
    }
    assert_eq!(
        results,
        vec![(2, "Arith.Multiply".to_string(), 6), (1, "Arith.Add".to_string(), 5)]
    );
}

#[tokio::test]
async fn unknown_procedure_is_not_sent() {
    let (client, _server) = codec_pair(arith_registry());

    let err = client.write_request(1, "Arith.Divide", &Args::default()).await.unwrap_err();
    assert!(matches!(err, RpcError::ProcedureUnavailable), "{err:?}");
    assert!(!err.is_connection_fatal());
    assert_eq!(client.pending_calls(), 0);
}

#[tokio::test]
async fn server_reports_unregistered_triple() {
    let (client_end, server_end) = tokio::io::duplex(4096);
    let mut server = sunrpc::protocol::rpc::ServerCodec::new(server_end, arith_registry());
    let (_, mut raw) = tokio::io::split(client_end);

    let payload = to_bytes(&call_message(9, 12345, 1, 99)).unwrap();
    write_record(&mut raw, &payload, &RecordConfig::default()).await.unwrap();

    let err = server.read_request_header().await.unwrap_err();
    assert!(matches!(err, RpcError::ProcedureUnavailable), "{err:?}");
}

#[tokio::test]
async fn server_rejects_other_rpc_versions() {
    let (client_end, server_end) = tokio::io::duplex(4096);
    let mut server = sunrpc::protocol::rpc::ServerCodec::new(server_end, arith_registry());
    let (_, mut raw) = tokio::io::split(client_end);

    let call = call_body { rpcvers: 3, ..call_body::new(ADD.program, ADD.version, ADD.procedure) };
    let payload = to_bytes(&rpc_msg { xid: 5, body: rpc_body::CALL(call) }).unwrap();
    write_record(&mut raw, &payload, &RecordConfig::default()).await.unwrap();

    let err = server.read_request_header().await.unwrap_err();
    assert!(matches!(err, RpcError::RpcVersionMismatch { low: 2, high: 2 }), "{err:?}");
}

#[tokio::test]
async fn duplicate_reply_is_unexpected() {
    let (client, mut server) = codec_pair(arith_registry());

    client.write_request(7, "Arith.Add", &Args { a: 1, b: 1 }).await.unwrap();
    server.read_request_header().await.unwrap();
    server.write_response(7, &2_i32, None).await.unwrap();
    server.write_response(7, &2_i32, None).await.unwrap();

    let header = client.read_response_header().await.unwrap();
    assert_eq!(header.call_id, 7);
    assert_eq!(client.pending_calls(), 0);
    client.read_response_body::<i32>(None).await.unwrap();

    let err = client.read_response_header().await.unwrap_err();
    assert!(matches!(err, RpcError::UnexpectedReplyId(7)), "{err:?}");
    assert!(err.is_connection_fatal());
}

#[tokio::test]
async fn rejections_surface_per_call() {
    let cases = [
        (
            accepted(accept_body::PROG_MISMATCH(mismatch_info { low: 1, high: 2 })),
            "program mismatch",
        ),
        (accepted(accept_body::PROG_UNAVAIL), "program unavailable"),
        (accepted(accept_body::PROC_UNAVAIL), "procedure unavailable"),
        (accepted(accept_body::GARBAGE_ARGS), "garbage arguments"),
        (accepted(accept_body::SYSTEM_ERR), "system error"),
        (reply_body::MSG_DENIED(rejected_reply::AUTH_ERROR(auth_stat::AUTH_TOOWEAK)), "auth"),
        (
            reply_body::MSG_DENIED(rejected_reply::RPC_MISMATCH(mismatch_info { low: 2, high: 2 })),
            "rpc mismatch",
        ),
    ];

    let (client, mut server) = codec_pair(arith_registry());
    for (call_id, (reply, case)) in (100..).zip(cases) {
        client.write_request(call_id, "Arith.Add", &Args::default()).await.unwrap();
        let request = server.read_request_header().await.unwrap();
        server.write_reply(request.call_id, reply).await.unwrap();

        let header = client.read_response_header().await.expect(case);
        assert_eq!(header.call_id, call_id);
        let err = header.result.expect_err(case);
        assert!(!err.is_connection_fatal(), "{case}: {err:?}");
        match case {
            "program mismatch" => {
                assert!(matches!(err, RpcError::ProgramMismatch { low: 1, high: 2 }))
            }
            "program unavailable" => assert!(matches!(err, RpcError::ProgramUnavailable)),
            "procedure unavailable" => assert!(matches!(err, RpcError::ProcedureUnavailable)),
            "garbage arguments" => assert!(matches!(err, RpcError::GarbageArguments)),
            "system error" => assert!(matches!(err, RpcError::SystemError)),
            "auth" => {
                assert!(matches!(err, RpcError::AuthenticationError(auth_stat::AUTH_TOOWEAK)))
            }
            "rpc mismatch" => {
                assert!(matches!(err, RpcError::RpcVersionMismatch { low: 2, high: 2 }))
            }
            _ => unreachable!(),
        }

        // A rejected reply carries no results.
        let mut value = 0_i32;
        let err = client.read_response_body(Some(&mut value)).await.unwrap_err();
        assert!(matches!(err, RpcError::NoRecordStaged), "{case}: {err:?}");
    }
    assert_eq!(client.pending_calls(), 0);
}

#[tokio::test]
async fn unknown_reply_status_is_reported_not_fatal() {
    let (client_end, server_end) = tokio::io::duplex(4096);
    let client = ClientCodec::new(client_end, arith_registry()).unwrap();
    let (_, mut raw) = tokio::io::split(server_end);

    client.write_request(3, "Arith.Add", &Args::default()).await.unwrap();

    let mut payload = Vec::new();
    3_u32.serialize(&mut payload).unwrap();
    REPLY.serialize(&mut payload).unwrap();
    // reply_stat 2 is neither MSG_ACCEPTED nor MSG_DENIED
    2_u32.serialize(&mut payload).unwrap();
    write_record(&mut raw, &payload, &RecordConfig::default()).await.unwrap();

    let header = client.read_response_header().await.expect("header");
    assert_eq!(header.call_id, 3);
    let err = header.result.expect_err("unrecognized reply");
    assert!(matches!(err, RpcError::UnrecognizedReply(_)), "{err:?}");
    assert!(!err.is_connection_fatal());

    // The stream is still at a record boundary and keeps working.
    client.write_request(4, "Arith.Add", &Args::default()).await.unwrap();
    let mut payload = to_bytes(&make_success_reply(4)).unwrap();
    9_i32.serialize(&mut payload).unwrap();
    write_record(&mut raw, &payload, &RecordConfig::default()).await.unwrap();

    let header = client.read_response_header().await.expect("next header");
    assert_eq!(header.call_id, 4);
    header.result.expect("call succeeded");
    let mut value = 0_i32;
    client.read_response_body(Some(&mut value)).await.unwrap();
    assert_eq!(value, 9);
}

#[tokio::test]
async fn truncated_reply_header_is_fatal() {
    let (client_end, server_end) = tokio::io::duplex(4096);
    let client = ClientCodec::new(client_end, arith_registry()).unwrap();
    let (_, mut raw) = tokio::io::split(server_end);

    client.write_request(4, "Arith.Add", &Args::default()).await.unwrap();

    let mut payload = to_bytes(&make_success_reply(4)).unwrap();
    payload.truncate(12);
    write_record(&mut raw, &payload, &RecordConfig::default()).await.unwrap();

    let err = client.read_response_header().await.unwrap_err();
    assert!(matches!(err, RpcError::Decode(_)), "{err:?}");
}

#[tokio::test]
async fn wrong_message_direction_is_rejected() {
    let (client, mut server) = codec_pair(arith_registry());

    // The client sends a call; feeding it back to the client looks like a
    // reply stream carrying a CALL.
    let (client_end, server_end) = tokio::io::duplex(4096);
    let echo = ClientCodec::new(client_end, arith_registry()).unwrap();
    let (_, mut raw) = tokio::io::split(server_end);
    let payload = to_bytes(&call_message(1, ADD.program, ADD.version, ADD.procedure)).unwrap();
    write_record(&mut raw, &payload, &RecordConfig::default()).await.unwrap();
    let err = echo.read_response_header().await.unwrap_err();
    assert!(matches!(err, RpcError::InvalidMessageType(CALL)), "{err:?}");

    // And a server handed a reply refuses it.
    let (client_end, server_end) = tokio::io::duplex(4096);
    let mut lone_server = sunrpc::protocol::rpc::ServerCodec::new(server_end, arith_registry());
    let (_, mut raw) = tokio::io::split(client_end);
    let payload = to_bytes(&make_success_reply(1)).unwrap();
    write_record(&mut raw, &payload, &RecordConfig::default()).await.unwrap();
    let err = lone_server.read_request_header().await.unwrap_err();
    assert!(matches!(err, RpcError::InvalidMessageType(REPLY)), "{err:?}");

    // The well-behaved pair is unaffected.
    client.write_request(1, "Arith.Add", &Args::default()).await.unwrap();
    assert_eq!(server.read_request_header().await.unwrap().call_id, 1);
}

#[tokio::test]
async fn body_reads_without_a_staged_record() {
    let (client, mut server) = codec_pair(arith_registry());

    let mut args = Args::default();
    let err = server.read_request_body(Some(&mut args)).await.unwrap_err();
    assert!(matches!(err, RpcError::NoRecordStaged), "{err:?}");
    server.read_request_body::<Args>(None).await.expect("discard is always fine");

    let mut value = 0_i32;
    let err = client.read_response_body(Some(&mut value)).await.unwrap_err();
    assert!(matches!(err, RpcError::NoRecordStaged), "{err:?}");
    client.read_response_body::<i32>(None).await.expect("discard is always fine");
}

#[tokio::test]
async fn discarded_arguments_do_not_disturb_the_next_call() {
    let (client, mut server) = codec_pair(arith_registry());

    client.write_request(1, "Arith.Add", &Args { a: 1, b: 2 }).await.unwrap();
    client.write_request(2, "Arith.Add", &Args { a: 3, b: 4 }).await.unwrap();

    let first = server.read_request_header().await.unwrap();
    assert_eq!(first.call_id, 1);
    server.read_request_body::<Args>(None).await.unwrap();

    let second = server.read_request_header().await.unwrap();
    assert_eq!(second.call_id, 2);
    let mut args = Args::default();
    server.read_request_body(Some(&mut args)).await.unwrap();
    assert_eq!(args, Args { a: 3, b: 4 });
}

#[tokio::test]
async fn garbage_arguments_fail_the_body_read() {
    let (client, mut server) = codec_pair(arith_registry());

    // A single integer where two are expected.
    client.write_request(8, "Arith.Add", &1_i32).await.unwrap();
    server.read_request_header().await.unwrap();
    let mut args = Args::default();
    let err = server.read_request_body(Some(&mut args)).await.unwrap_err();
    assert!(matches!(err, RpcError::Decode(_)), "{err:?}");
}

#[tokio::test]
async fn procedure_errors_still_reply_success() {
    let (client, mut server) = codec_pair(arith_registry());

    client.write_request(11, "Arith.Multiply", &Args { a: 0, b: 0 }).await.unwrap();
    server.read_request_header().await.unwrap();
    server.write_response(11, &0_i32, Some("operands were zero")).await.unwrap();

    let header = client.read_response_header().await.unwrap();
    assert!(header.result.is_ok(), "{:?}", header.result);
    let mut value = -1_i32;
    client.read_response_body(Some(&mut value)).await.unwrap();
    assert_eq!(value, 0);
}

#[tokio::test]
async fn concurrent_writers_produce_whole_records() {
    let (client, mut server) = codec_pair(arith_registry());
    let client = Arc::new(client);

    let writers: Vec<_> = (0..16_u32)
        .map(|call_id| {
            let client = client.clone();
            tokio::spawn(async move {
                let args = Args { a: call_id as i32, b: 1 };
                client.write_request(call_id, "Arith.Add", &args).await
            })
        })
        .collect();

    let mut seen = BTreeSet::new();
    for _ in 0..16 {
        let header = timeout(Duration::from_secs(5), server.read_request_header())
            .await
            .expect("request timeout")
            .expect("read request header");
        let mut args = Args::default();
        server.read_request_body(Some(&mut args)).await.unwrap();
        assert_eq!(args.a as u32, header.call_id);
        seen.insert(header.call_id);
    }
    for writer in writers {
        writer.await.expect("writer task").expect("write request");
    }
    assert_eq!(seen, (0..16).collect());
    assert_eq!(client.pending_calls(), 16);
}

#[tokio::test]
async fn small_fragments_on_both_sides() {
    let (client_end, server_end) = tokio::io::duplex(4096);
    let config = RecordConfig::default().with_max_fragment_size(8);
    let client = ClientCodec::new(client_end, arith_registry()).unwrap().with_record_config(config);
    let mut server = sunrpc::protocol::rpc::ServerCodec::new(server_end, arith_registry())
        .with_record_config(config);

    client.write_request(21, "Arith.Multiply", &Args { a: 6, b: 7 }).await.unwrap();
    let request = server.read_request_header().await.unwrap();
    let mut args = Args::default();
    server.read_request_body(Some(&mut args)).await.unwrap();
    server.write_response(request.call_id, &(args.a * args.b), None).await.unwrap();

    client.read_response_header().await.unwrap().result.unwrap();
    let mut product = 0_i32;
    client.read_response_body(Some(&mut product)).await.unwrap();
    assert_eq!(product, 42);
}

#[tokio::test]
async fn close_signals_once() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let (client, _) = codec_pair(arith_registry());
    let (_, server) = codec_pair(arith_registry());
    let client = client.with_close_signal(tx.clone(), "client");
    let mut server = server.with_close_signal(tx, "server");

    client.close().await.expect("close client");
    client.close().await.expect("second close is a no-op");
    server.close().await.expect("close server");
    server.close().await.expect("second close is a no-op");

    assert_eq!(rx.recv().await.as_deref(), Some("client"));
    assert_eq!(rx.recv().await.as_deref(), Some("server"));
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn client_close_ends_server_reads() {
    let (client, mut server) = codec_pair(arith_registry());

    client.write_request(1, "Arith.Add", &Args::default()).await.unwrap();
    client.close().await.unwrap();

    assert_eq!(server.read_request_header().await.unwrap().call_id, 1);
    let err = server.read_request_header().await.unwrap_err();
    assert!(matches!(err, RpcError::ConnectionClosed), "{err:?}");
}

#[tokio::test]
async fn client_close_wakes_a_waiting_reader() {
    let (client, _server) = codec_pair(arith_registry());
    let client = Arc::new(client);

    let reader = {
        let client = client.clone();
        tokio::spawn(async move { client.read_response_header().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    client.close().await.expect("close");

    let result = timeout(Duration::from_secs(1), reader)
        .await
        .expect("reader still blocked after close")
        .expect("reader task");
    assert!(matches!(result, Err(RpcError::ConnectionClosed)), "{result:?}");

    let err = client.read_response_header().await.unwrap_err();
    assert!(matches!(err, RpcError::ConnectionClosed), "{err:?}");
}

#[tokio::test]
async fn server_close_ends_client_reads() {
    let (client, mut server) = codec_pair(arith_registry());

    server.close().await.unwrap();
    let err = client.read_response_header().await.unwrap_err();
    assert!(matches!(err, RpcError::ConnectionClosed), "{err:?}");
    assert!(err.is_connection_fatal());
}
