// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Loopback test: a real QUIC server and client exchanging one RPC.

use std::time::Duration;

use wvs_protocol::executor_proto::{ExecuteTaskRequest, ExecuteTaskResponse, TaskOp};
use wvs_protocol::{ConnectionHandler, RpcClient, RpcServer, StreamHandler};

#[tokio::test]
async fn unary_round_trip_over_quic() {
    let server = RpcServer::localhost("127.0.0.1:0".parse().unwrap()).unwrap();
    let addr = server.local_addr().unwrap();

    tokio::spawn(async move {
        let _ = server
            .run(move |conn: ConnectionHandler| async move {
                conn.run(move |mut stream: StreamHandler| async move {
                    let _ = stream
                        .handle_request(|req: ExecuteTaskRequest| async move {
                            ExecuteTaskResponse {
                                success: true,
                                results: [("echo".to_string(), req.wsid)].into(),
                                error_code: String::new(),
                                error_message: String::new(),
                            }
                        })
                        .await;
                })
                .await;
            })
            .await;
    });

    // Give the accept loop a beat to start.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let client = RpcClient::localhost(addr).unwrap();
    let request = ExecuteTaskRequest {
        task_id: "t1".into(),
        wsid: "w1".into(),
        op: TaskOp::InitWorkspace.into(),
        params: Default::default(),
    };

    let response: ExecuteTaskResponse = client.request(&request).await.unwrap();
    assert!(response.success);
    assert_eq!(response.results.get("echo").map(String::as_str), Some("w1"));

    // A second request reuses the connection.
    let response: ExecuteTaskResponse = client.request(&request).await.unwrap();
    assert!(response.success);

    client.close().await;
}
