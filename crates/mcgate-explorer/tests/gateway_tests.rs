mod common;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use common::{asset, block, block_summary, gateway, getinfo, hex64, stream, window, MockDaemon, Reply};
use mcgate_explorer::types::Transaction;
use mcgate_explorer::{EntityKind, ExplorerError, Order, PageRequest, Query, QueryResponse};

fn assets(n: usize) -> Vec<Value> {
    (0..n).map(asset).collect()
}

#[tokio::test]
async fn concurrent_block_lookups_share_one_upstream_call() {
    let daemon = MockDaemon::with_delay(Duration::from_millis(50), |method, params| match method {
        "getblockhash" => Reply::Ok(json!(hex64('b', params[0].as_u64().unwrap_or(0)))),
        "getblock" => Reply::Ok(block(100)),
        _ => Reply::Rpc(-32601, "Method not found"),
    });
    let gw = gateway(daemon.clone());

    let (a, b) = tokio::join!(gw.get_block_by_height(100), gw.get_block_by_height(100));
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a, b);
    assert_eq!(a.height, 100);
    assert_eq!(daemon.calls("getblockhash"), 1);
    assert_eq!(daemon.calls("getblock"), 1);
    assert_eq!(daemon.params("getblock")[0], vec![json!(hex64('b', 100)), json!(1)]);

    // Served from cache afterwards.
    gw.get_block_by_height(100).await.unwrap();
    assert_eq!(daemon.total_calls(), 2);
}

#[tokio::test]
async fn short_asset_listing_has_no_more() {
    let all = assets(30);
    let daemon = MockDaemon::new(move |method, params| match method {
        "listassets" => Reply::Ok(window(&all, params, 2)),
        _ => Reply::Rpc(-32601, "Method not found"),
    });
    let gw = gateway(daemon.clone());

    let page = gw.list_assets(&PageRequest::new(0, 50)).await.unwrap();
    assert_eq!(page.items.len(), 30);
    assert!(!page.has_more);
    assert_eq!(daemon.params("listassets")[0], vec![json!("*"), json!(true), json!(51), json!(0)]);

    let page = gw.list_assets(&PageRequest::new(10, 10)).await.unwrap();
    assert_eq!(page.items[0].label(), "asset10");
    assert!(page.has_more);
}

#[tokio::test]
async fn descending_asset_pages_read_the_tail() {
    let all = assets(30);
    let daemon = MockDaemon::new(move |method, params| match method {
        "listassets" => Reply::Ok(window(&all, params, 2)),
        _ => Reply::Rpc(-32601, "Method not found"),
    });
    let gw = gateway(daemon.clone());

    let latest = gw.list_assets(&PageRequest::latest(5)).await.unwrap();
    let names: Vec<&str> = latest.items.iter().map(|a| a.label()).collect();
    assert_eq!(names, ["asset29", "asset28", "asset27", "asset26", "asset25"]);
    assert!(latest.has_more);
    assert_eq!(daemon.params("listassets")[0][3], json!(-6));

    let last = gw
        .list_assets(&PageRequest::new(27, 5).with_order(Order::Desc))
        .await
        .unwrap();
    let names: Vec<&str> = last.items.iter().map(|a| a.label()).collect();
    assert_eq!(names, ["asset2", "asset1", "asset0"]);
    assert!(!last.has_more);
}

#[tokio::test]
async fn unknown_txid_is_not_found_and_not_cached() {
    let daemon = MockDaemon::new(|method, _| match method {
        "getrawtransaction" => Reply::Rpc(-5, "No information available about transaction"),
        _ => Reply::Rpc(-32601, "Method not found"),
    });
    let gw = gateway(daemon.clone());
    let txid = hex64('f', 1);

    for _ in 0..2 {
        let err = gw.get_transaction(&txid).await.unwrap_err();
        match &err {
            ExplorerError::NotFound { kind, id } => {
                assert_eq!(*kind, EntityKind::Transaction);
                assert_eq!(id, &txid);
            }
            other => panic!("expected NotFound, got {other:?}"),
        }
        assert_eq!(err.status().code(), 404);
    }
    assert_eq!(daemon.calls("getrawtransaction"), 2);
}

#[tokio::test]
async fn transaction_reencodes_like_the_daemon_sent_it() {
    let raw = json!({
        "hex": "0100000001",
        "txid": hex64('a', 7),
        "version": 1,
        "locktime": 0,
        "vin": [{"txid": hex64('a', 6), "vout": 0, "scriptSig": {"asm": "", "hex": ""}, "sequence": 4294967295u64}],
        "vout": [{"value": 0, "n": 0, "assets": [{"name": "asset1", "qty": 10}], "permissions": [], "items": []}],
        "data": [],
        "blockhash": hex64('b', 7),
        "confirmations": 12,
        "time": 1700000007,
        "blocktime": 1700000007
    });
    let reply = raw.clone();
    let daemon = MockDaemon::new(move |_, _| Reply::Ok(reply.clone()));
    let gw = gateway(daemon);

    let tx: Transaction = gw.get_transaction(&hex64('A', 7)).await.unwrap();
    assert!(tx.is_confirmed());
    assert_eq!(serde_json::to_value(&tx).unwrap(), raw);
}

#[tokio::test]
async fn block_pages_follow_the_chain_tip() {
    let daemon = MockDaemon::new(|method, params| match method {
        "getinfo" => Reply::Ok(getinfo(100)),
        "listblocks" => {
            let range = params[0].as_str().unwrap_or_default().to_string();
            let (lo, hi) = range.split_once('-').unwrap_or(("0", "0"));
            let (lo, hi): (u64, u64) = (lo.parse().unwrap_or(0), hi.parse().unwrap_or(0));
            Reply::Ok(Value::Array((lo..=hi).map(block_summary).collect()))
        }
        _ => Reply::Rpc(-32601, "Method not found"),
    });
    let gw = gateway(daemon.clone());

    let latest = gw.list_blocks(&PageRequest::latest(10)).await.unwrap();
    let heights: Vec<u64> = latest.items.iter().map(|b| b.height).collect();
    assert_eq!(heights, (91..=100).rev().collect::<Vec<_>>());
    assert!(latest.has_more);

    let tail = gw.list_blocks(&PageRequest::new(95, 10)).await.unwrap();
    assert_eq!(tail.items.len(), 6);
    assert!(!tail.has_more);

    let oldest = gw
        .list_blocks(&PageRequest::new(95, 10).with_order(Order::Desc))
        .await
        .unwrap();
    let heights: Vec<u64> = oldest.items.iter().map(|b| b.height).collect();
    assert_eq!(heights, vec![5, 4, 3, 2, 1, 0]);
    assert!(!oldest.has_more);

    let beyond = gw.list_blocks(&PageRequest::new(500, 10)).await.unwrap();
    assert!(beyond.items.is_empty());

    assert_eq!(
        daemon.params("listblocks"),
        vec![vec![json!("91-100")], vec![json!("95-100")], vec![json!("0-5")]]
    );
    assert_eq!(daemon.calls("getinfo"), 1);
}

#[tokio::test]
async fn new_block_refreshes_listings_but_keeps_blocks() {
    let height = Arc::new(AtomicU64::new(10));
    let tip = height.clone();
    let all = assets(3);
    let daemon = MockDaemon::new(move |method, params| match method {
        "getinfo" => Reply::Ok(getinfo(tip.load(Ordering::SeqCst))),
        "listassets" => Reply::Ok(window(&all, params, 2)),
        "getblock" => Reply::Ok(block(5)),
        _ => Reply::Rpc(-32601, "Method not found"),
    });
    let gw = gateway(daemon.clone());

    gw.refresh_head().await.unwrap();
    gw.list_assets(&PageRequest::default()).await.unwrap();
    gw.get_block_by_hash(&hex64('b', 5)).await.unwrap();

    height.store(11, Ordering::SeqCst);
    gw.refresh_head().await.unwrap();
    gw.list_assets(&PageRequest::default()).await.unwrap();
    gw.get_block_by_hash(&hex64('b', 5)).await.unwrap();

    assert_eq!(daemon.calls("listassets"), 2);
    assert_eq!(daemon.calls("getblock"), 1);
    assert_eq!(gw.last_height(), Some(11));
}

#[tokio::test]
async fn single_asset_and_stream_lookups() {
    let daemon = MockDaemon::new(|method, params| match (method, params[0].as_str()) {
        ("listassets", Some("asset1")) => Reply::Ok(json!([asset(1)])),
        ("listassets", _) => Reply::Rpc(-708, "Asset or stream with this name not found"),
        ("liststreams", Some("root")) => Reply::Ok(json!([stream("root")])),
        ("liststreams", _) => Reply::Ok(json!([])),
        _ => Reply::Rpc(-32601, "Method not found"),
    });
    let gw = gateway(daemon);

    assert_eq!(gw.get_asset("asset1").await.unwrap().label(), "asset1");
    assert!(gw.get_asset("nope").await.unwrap_err().is_not_found());
    assert_eq!(gw.get_stream("root").await.unwrap().items, Some(2));
    let err = gw.get_stream("ghost").await.unwrap_err();
    assert!(matches!(err, ExplorerError::NotFound { kind: EntityKind::Stream, .. }));
}

#[tokio::test]
async fn stream_listings_send_multichain_parameters() {
    let daemon = MockDaemon::new(|_, _| Reply::Ok(json!([])));
    let gw = gateway(daemon.clone());
    let page = PageRequest::new(0, 10);
    let publisher = "1PubKeyAddrXXXXXXXXXXXXXXXXXX";

    gw.list_stream_items("root", &page).await.unwrap();
    gw.list_stream_keys("root", &page).await.unwrap();
    gw.list_stream_publishers("root", &page).await.unwrap();
    gw.list_stream_key_items("root", "order/42", &page).await.unwrap();
    gw.list_stream_publisher_items("root", publisher, &page).await.unwrap();

    assert_eq!(daemon.params("liststreamitems")[0], vec![json!("root"), json!(false), json!(11), json!(0)]);
    assert_eq!(
        daemon.params("liststreamkeys")[0],
        vec![json!("root"), json!("*"), json!(false), json!(11), json!(0)]
    );
    assert_eq!(
        daemon.params("liststreampublishers")[0],
        vec![json!("root"), json!("*"), json!(false), json!(11), json!(0)]
    );
    assert_eq!(
        daemon.params("liststreamkeyitems")[0],
        vec![json!("root"), json!("order/42"), json!(false), json!(11), json!(0)]
    );
    assert_eq!(
        daemon.params("liststreampublisheritems")[0],
        vec![json!("root"), json!(publisher), json!(false), json!(11), json!(0)]
    );
}

#[tokio::test]
async fn address_history_pages() {
    let address = "1AddressForHistoryXXXXXXXXXXX";
    let entries: Vec<Value> = (0..8).map(|i| json!({"txid": hex64('a', i), "confirmations": 8 - i})).collect();
    let daemon = MockDaemon::new(move |method, params| match method {
        "listaddresstransactions" => {
            // Newest `count` after skipping `skip` newest, in chronological order.
            let count = params[1].as_u64().unwrap_or(10) as usize;
            let skip = params[2].as_u64().unwrap_or(0) as usize;
            let end = entries.len().saturating_sub(skip);
            let start = end.saturating_sub(count);
            Reply::Ok(Value::Array(entries[start..end].to_vec()))
        }
        _ => Reply::Rpc(-32601, "Method not found"),
    });
    let gw = gateway(daemon.clone());

    let newest = gw
        .list_address_transactions(address, &PageRequest::latest(3))
        .await
        .unwrap();
    let ids: Vec<&str> = newest.items.iter().map(|e| e.txid.as_str()).collect();
    assert_eq!(ids, [hex64('a', 7), hex64('a', 6), hex64('a', 5)]);
    assert!(newest.has_more);
    assert_eq!(daemon.params("listaddresstransactions")[0], vec![json!(address), json!(4), json!(0), json!(false)]);

    let oldest = gw
        .list_address_transactions(address, &PageRequest::new(6, 3))
        .await
        .unwrap();
    let ids: Vec<&str> = oldest.items.iter().map(|e| e.txid.as_str()).collect();
    assert_eq!(ids, [hex64('a', 6), hex64('a', 7)]);
    assert!(!oldest.has_more);
}

#[tokio::test]
async fn permissions_are_paged_client_side() {
    let daemon = MockDaemon::new(|method, params| match method {
        "listpermissions" if params.len() == 1 => Reply::Ok(Value::Array(
            (0..5)
                .map(|i| json!({"address": format!("1Miner{i}"), "for": null, "type": "mine"}))
                .collect(),
        )),
        "listpermissions" => Reply::Ok(json!([{"address": params[1], "for": null, "type": "connect"}])),
        _ => Reply::Rpc(-32601, "Method not found"),
    });
    let gw = gateway(daemon.clone());

    let page = gw.list_permissions("MINE", &PageRequest::new(3, 10)).await.unwrap();
    assert_eq!(page.items.len(), 2);
    assert!(!page.has_more);
    assert_eq!(daemon.params("listpermissions")[0], vec![json!("mine")]);

    let address = "1GrantedAddrXXXXXXXXXXXXXXXXX";
    let perms = gw.list_address_permissions(address).await.unwrap();
    assert_eq!(perms[0].permission, "connect");
    assert_eq!(daemon.params("listpermissions")[1], vec![json!("*"), json!(address)]);
}

#[tokio::test]
async fn search_resolves_each_query_shape() {
    let txid = hex64('a', 1);
    let known_tx = txid.clone();
    // Both a block hash and a txid.
    let shared = hex64('f', 7);
    let shared_id = shared.clone();
    let daemon = MockDaemon::new(move |method, params| match method {
        "getblockhash" => match params[0].as_u64() {
            Some(h) if h <= 42 => Reply::Ok(json!(hex64('b', h))),
            _ => Reply::Rpc(-8, "Block height out of range"),
        },
        "getblock" if params[0] == json!(hex64('b', 42)) => Reply::Ok(block(42)),
        "getblock" if params[0] == json!(shared_id) => {
            let mut b = block(7);
            b["hash"] = json!(shared_id);
            Reply::Ok(b)
        }
        "getblock" => Reply::Rpc(-5, "Block not found"),
        "getrawtransaction" if params[0] == json!(known_tx) || params[0] == json!(shared_id) => {
            Reply::Ok(json!({"txid": params[0], "vin": [], "vout": []}))
        }
        "getrawtransaction" => Reply::Rpc(-5, "No information available about transaction"),
        "listassets" if params[0] == json!("gold") => Reply::Ok(json!([asset(1)])),
        "listassets" if params[0] == json!("2024") => {
            let mut a = asset(2);
            a["name"] = json!("2024");
            Reply::Ok(json!([a]))
        }
        "listassets" => Reply::Rpc(-708, "Asset not found"),
        "liststreams" if params[0] == json!("42") => Reply::Ok(json!([stream("42")])),
        "liststreams" => Reply::Rpc(-708, "Stream not found"),
        _ => Reply::Rpc(-32601, "Method not found"),
    });
    let gw = gateway(daemon.clone());

    let hits = gw.search(" 42 ").await.unwrap();
    let kinds: Vec<_> = hits.iter().map(|h| h.kind).collect();
    assert_eq!(kinds, vec![EntityKind::Block, EntityKind::Stream]);
    assert_eq!(hits[0].label, "Block 42");
    assert_eq!(hits[1].id, "42");

    // Past the tip: no block, but the all-digit asset name still matches.
    let hits = gw.search("2024").await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].kind, EntityKind::Asset);
    assert_eq!(hits[0].label, "Asset 2024");
    assert!(daemon.params("listassets").contains(&vec![json!("2024"), json!(true)]));

    let hits = gw.search(&txid).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].kind, EntityKind::Transaction);
    assert_eq!(hits[0].id, txid);

    let hits = gw.search(&hex64('b', 42)).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].kind, EntityKind::Block);

    let hits = gw.search(&shared).await.unwrap();
    let kinds: Vec<_> = hits.iter().map(|h| h.kind).collect();
    assert_eq!(kinds, vec![EntityKind::Block, EntityKind::Transaction]);
    assert!(hits.iter().all(|h| h.id == shared));

    let hits = gw.search("gold").await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].kind, EntityKind::Asset);

    assert!(gw.search("nothing").await.unwrap().is_empty());
    assert!(gw.search("bad query!").await.is_err());
}

#[tokio::test]
async fn execute_dispatches_and_reports_errors() {
    let daemon = MockDaemon::new(|method, _| match method {
        "getinfo" => Reply::Ok(getinfo(7)),
        "getblockhash" => Reply::Rpc(-8, "Block height out of range"),
        _ => Reply::Rpc(-32601, "Method not found"),
    });
    let gw = gateway(daemon);

    match gw.execute(Query::ChainInfo).await.unwrap() {
        QueryResponse::ChainInfo(info) => assert_eq!(info.blocks, 7),
        other => panic!("unexpected response {other:?}"),
    }

    let err = gw
        .execute(Query::GetBlockByHeight { height: 1000 })
        .await
        .unwrap_err();
    assert!(matches!(err, ExplorerError::NotFound { kind: EntityKind::Block, .. }));

    let err = gw
        .execute(Query::GetTransaction { txid: "xyz".into() })
        .await
        .unwrap_err();
    assert_eq!(err.status().code(), 400);

    match gw.execute(Query::Health).await.unwrap() {
        QueryResponse::Health(report) => {
            assert!(report.healthy);
            assert_eq!(report.height, Some(7));
        }
        other => panic!("unexpected response {other:?}"),
    }
}

#[tokio::test]
async fn daemon_errors_keep_their_code() {
    let daemon = MockDaemon::new(|_, _| Reply::Rpc(-703, "Not subscribed to this asset"));
    let gw = gateway(daemon);
    let err = gw
        .list_asset_transactions("asset1", &PageRequest::default())
        .await
        .unwrap_err();
    match err {
        ExplorerError::Rpc { method, code, .. } => {
            assert_eq!(method, "listassettransactions");
            assert_eq!(code, -703);
        }
        other => panic!("expected Rpc, got {other:?}"),
    }
}
