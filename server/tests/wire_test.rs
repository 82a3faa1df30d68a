//! Wire-format tests for the record API.
//!
//! The live round trip at the bottom needs a running server. Start one with
//! `cargo run -p offsync-server`, set OFFSYNC_SERVER_URL, and run with
//! `--ignored`.

use offsync_engine::remote::{RecordDraft, RecordPatch};
use offsync_engine::{HttpRemoteClient, RemoteClient, RemoteError, RemoteRecord};
use serde_json::json;

#[cfg(test)]
mod wire_format {
    use super::*;

    #[test]
    fn draft_body_is_camel_case() {
        let draft = RecordDraft {
            owner_id: "user1".into(),
            payload: json!({"title": "Entry"}),
            created_at: 1_706_745_600_000,
        };
        assert_eq!(
            serde_json::to_value(&draft).unwrap(),
            json!({
                "ownerId": "user1",
                "payload": {"title": "Entry"},
                "createdAt": 1_706_745_600_000u64
            })
        );
    }

    #[test]
    fn patch_body_carries_only_payload() {
        let patch = RecordPatch {
            payload: json!({"done": true}),
        };
        assert_eq!(
            serde_json::to_value(&patch).unwrap(),
            json!({"payload": {"done": true}})
        );
    }

    #[test]
    fn server_record_parses() {
        let body = r#"{
            "id": "5b8f3c3e-6f0e-4c1b-9a57-3f1f7c2d9e10",
            "ownerId": "user1",
            "payload": {"title": "Entry", "tags": ["a"]},
            "createdAt": 1706745600000,
            "updatedAt": 1706745601000
        }"#;
        let record: RemoteRecord = serde_json::from_str(body).unwrap();
        assert_eq!(record.owner_id, "user1");
        assert_eq!(record.updated_at - record.created_at, 1_000);
        assert_eq!(record.payload["tags"][0], "a");
    }

    #[test]
    fn missing_updated_at_is_rejected() {
        let body = r#"{"id":"x","ownerId":"u","payload":{},"createdAt":1}"#;
        assert!(serde_json::from_str::<RemoteRecord>(body).is_err());
    }
}

#[tokio::test]
#[ignore = "requires a running offsync-server and OFFSYNC_SERVER_URL"]
async fn live_round_trip() {
    let base_url = std::env::var("OFFSYNC_SERVER_URL").unwrap();
    let client = HttpRemoteClient::new(&base_url).unwrap();
    let owner = format!("wire-test-{}", std::process::id());

    let created = client
        .create(&RecordDraft {
            owner_id: owner.clone(),
            payload: json!({"title": "first"}),
            created_at: 1_000,
        })
        .await
        .unwrap();
    assert_eq!(created.created_at, 1_000);

    let updated = client
        .update(
            &created.id,
            &RecordPatch {
                payload: json!({"title": "second"}),
            },
        )
        .await
        .unwrap();
    assert!(updated.updated_at >= created.updated_at);

    let listed = client.list(&owner).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].payload["title"], "second");

    client.delete(&created.id).await.unwrap();
    assert_eq!(
        client.get(&created.id).await,
        Err(RemoteError::NotFound(created.id.clone()))
    );
    assert_eq!(
        client.delete(&created.id).await,
        Err(RemoteError::NotFound(created.id.clone()))
    );
}
