//! Property-based tests for the data model
//!
//! These tests pin down the invariants the store relies on:
//!  - Content hashes ignore identity fields and depend only on the payload
//!  - A value read before a concurrent mutation is never installed in the cache
//!  - Envelopes keep their wire field names through a JSON round trip

use proptest::prelude::*;
use vellum_core::{ContentHash, DocumentCache, DocumentKind, Envelope, ImageAsset, ModelVersion};

fn image_strategy() -> impl Strategy<Value = ImageAsset> {
    ("[A-Za-z0-9+/]{0,64}", proptest::option::of("[a-z]{1,10}")).prop_map(|(data, author)| {
        let mut image = ImageAsset::new(format!("data:image/png;base64,{}", data));
        image.author = author;
        image
    })
}

#[derive(Clone, Debug)]
enum Mutation {
    Set(String),
    Clear,
    ClearAll,
    Untouched,
}

fn mutation_strategy() -> impl Strategy<Value = Mutation> {
    prop_oneof![
        "[a-z]{1,8}".prop_map(Mutation::Set),
        Just(Mutation::Clear),
        Just(Mutation::ClearAll),
        Just(Mutation::Untouched),
    ]
}

proptest! {
    #[test]
    fn hash_ignores_identity(image in image_strategy(), a in "[a-z0-9-]{1,20}", b in "[a-z0-9-]{1,20}") {
        let mut first = image.clone();
        first.set_id(a);
        let mut second = image;
        second.set_id(b);
        prop_assert_eq!(
            ContentHash::of_document(&first).unwrap(),
            ContentHash::of_document(&second).unwrap()
        );
    }

    #[test]
    fn hash_distinguishes_payloads(a in image_strategy(), b in image_strategy()) {
        let same = a.data == b.data && a.author == b.author;
        let equal_hash = ContentHash::of_document(&a).unwrap() == ContentHash::of_document(&b).unwrap();
        prop_assert_eq!(same, equal_hash);
    }

    #[test]
    fn hex_key_is_lowercase_and_fixed_width(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
        let hex = ContentHash::of_bytes(&bytes).to_hex();
        prop_assert_eq!(hex.len(), 64);
        prop_assert!(hex.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn stale_read_is_never_installed(initial in proptest::option::of("[a-z]{1,8}"), mutation in mutation_strategy()) {
        let mut cache = DocumentCache::new();
        if let Some(payload) = &initial {
            cache.set("doc", Envelope::new("doc", "GridData", payload.clone()));
        }

        let stamp = cache.stamp("doc");
        match &mutation {
            Mutation::Set(payload) => cache.set("doc", Envelope::new("doc", "GridData", payload.clone())),
            Mutation::Clear => cache.clear("doc"),
            Mutation::ClearAll => cache.clear_all(),
            Mutation::Untouched => {}
        }

        let installed = cache.set_if_unchanged("doc", Envelope::new("doc", "GridData", "from-engine"), stamp);
        prop_assert_eq!(installed, matches!(mutation, Mutation::Untouched));
        if !installed {
            let current = cache.get("doc").map(|e| e.encrypted_payload.clone());
            let expected = match mutation {
                Mutation::Set(payload) => Some(payload),
                _ => None,
            };
            prop_assert_eq!(current, expected);
        }
    }

    #[test]
    fn envelope_wire_round_trip(id in "[a-z]{1,8}-[0-9]{1,4}", payload in "[A-Za-z0-9=]{1,40}", rev in proptest::option::of("[1-9]-[a-f0-9]{8}")) {
        let mut envelope = Envelope::new(id, "GridData", payload);
        envelope.revision = rev;
        let json = serde_json::to_value(&envelope).unwrap();
        prop_assert!(json.get("encryptedDataBase64").is_some());
        prop_assert!(json.get("modelName").is_some());
        let back: Envelope = serde_json::from_value(json).unwrap();
        prop_assert_eq!(back, envelope);
    }

    #[test]
    fn version_order_follows_components(a in (0u64..5, 0u64..5, 0u64..5), b in (0u64..5, 0u64..5, 0u64..5)) {
        let va = ModelVersion::new(a.0, a.1, a.2);
        let vb = ModelVersion::new(b.0, b.1, b.2);
        prop_assert_eq!(va.cmp(&vb), a.cmp(&b));
        prop_assert_eq!(va.to_string().parse::<ModelVersion>().unwrap(), va);
    }
}
