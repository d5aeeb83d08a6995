//! Proptest strategies for protocol values.

use proptest::prelude::*;

use artisync_core::{hash_one_shot, ArtifactName, HashAlgorithm};

/// Arbitrary artifact content, up to 2 KiB.
pub fn arb_content() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..2048)
}

/// Arbitrary valid artifact name, mixing both hash families.
pub fn arb_name() -> impl Strategy<Value = ArtifactName> {
    (arb_content(), any::<bool>()).prop_map(|(content, sha3)| {
        let algo = if sha3 {
            HashAlgorithm::Sha3_256
        } else {
            HashAlgorithm::Sha1
        };
        hash_one_shot(&content, algo)
    })
}

/// Arbitrary TEXT-token material: printable ASCII plus the characters
/// the escape encoding has to handle.
pub fn arb_text() -> impl Strategy<Value = String> {
    prop::collection::vec(
        prop_oneof![
            prop::char::range(' ', '~'),
            Just('\n'),
            Just('\t'),
            Just('\r'),
            Just('\\'),
        ],
        0..80,
    )
    .prop_map(|chars| chars.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use artisync_core::{
        defossilize, delta_apply, delta_encode, fossilize, verify_against_name, Card,
        MessageReader,
    };

    proptest! {
        #[test]
        fn fossilize_round_trips(text in arb_text()) {
            let encoded = fossilize(&text);
            prop_assert!(!encoded.contains(' '));
            prop_assert!(!encoded.contains('\n'));
            prop_assert_eq!(defossilize(&encoded), text);
        }

        #[test]
        fn names_verify_their_content(content in arb_content(), sha3 in any::<bool>()) {
            let algo = if sha3 { HashAlgorithm::Sha3_256 } else { HashAlgorithm::Sha1 };
            let name = hash_one_shot(&content, algo);
            prop_assert!(verify_against_name(&content, &name));
        }

        #[test]
        fn delta_reconstructs_any_target(
            basis in arb_content(),
            target in arb_content(),
        ) {
            let patch = delta_encode(&basis, &target);
            let rebuilt = delta_apply(&basis, &patch).unwrap();
            prop_assert_eq!(rebuilt, target);
        }

        #[test]
        fn message_cards_survive_the_wire(
            text in arb_text().prop_filter("a message card needs a token", |t| !t.is_empty()),
        ) {
            let mut buf = Vec::new();
            Card::Message { text: text.clone() }.write(&mut buf);
            let mut reader = MessageReader::new(&buf);
            prop_assert_eq!(
                reader.next_card().unwrap(),
                Some(Card::Message { text })
            );
        }

        #[test]
        fn file_cards_carry_arbitrary_payloads(
            content in arb_content(),
            trailing in arb_content(),
        ) {
            let name = hash_one_shot(&content, HashAlgorithm::Sha1);
            let mut buf = Vec::new();
            Card::File {
                name: name.clone(),
                delta_src: None,
                content: content.clone().into(),
            }
            .write(&mut buf);
            buf.extend_from_slice(b"# end\n");
            buf.extend_from_slice(&trailing);

            let mut reader = MessageReader::new(&buf);
            match reader.next_card().unwrap() {
                Some(Card::File { name: got, content: payload, .. }) => {
                    prop_assert_eq!(got, name);
                    prop_assert_eq!(&payload[..], &content[..]);
                }
                other => prop_assert!(false, "expected file card, got {:?}", other),
            }
        }
    }
}
