//! Property-based tests for the identifier and caveat codecs and the
//! narrowing rules of the built-in satisfiers.

use proptest::prelude::*;

use lsat_paywall::{
    Caveat, Comparator, ExpirationSatisfier, Identifier, LsatError, OriginSatisfier, Satisfier,
    SatisfierContext, SatisfierSet, check_caveats,
};

mod strategies {
    use super::*;

    /// Condition names: no comparator characters, not empty.
    pub fn condition() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_]{0,15}"
    }

    /// Values may contain comparators but no surrounding whitespace.
    pub fn value() -> impl Strategy<Value = String> {
        "[!-~]{0,40}"
    }

    pub fn comparator() -> impl Strategy<Value = Comparator> {
        prop_oneof![
            Just(Comparator::Equal),
            Just(Comparator::LessThan),
            Just(Comparator::GreaterThan),
        ]
    }
}

proptest! {
    #[test]
    fn identifier_decodes_what_it_encodes(hash in any::<[u8; 32]>(), token_id in any::<[u8; 32]>()) {
        let id = Identifier::new(&hash, &token_id).unwrap();
        let decoded = Identifier::decode(&id.encode()).unwrap();

        prop_assert_eq!(decoded.payment_hash(), &hash);
        prop_assert_eq!(decoded.token_id(), &token_id);
        prop_assert_eq!(Identifier::from_hex(&id.to_hex()).unwrap(), id);
    }

    #[test]
    fn identifier_rejects_wrong_length(bytes in prop::collection::vec(any::<u8>(), 0..100)) {
        prop_assume!(bytes.len() != 66);
        prop_assert!(Identifier::decode(&bytes).is_err());
    }

    #[test]
    fn caveat_decodes_what_it_encodes(
        condition in strategies::condition(),
        comparator in strategies::comparator(),
        value in strategies::value(),
    ) {
        let caveat = Caveat::with_comparator(condition.clone(), comparator, value.clone());
        let decoded = Caveat::decode(&caveat.encode()).unwrap();

        prop_assert_eq!(decoded.condition(), condition.as_str());
        prop_assert_eq!(decoded.comparator(), comparator);
        prop_assert_eq!(decoded.value(), value.as_str());
    }

    #[test]
    fn caveat_without_comparator_is_rejected(text in "[a-z0-9 ]{0,30}") {
        let is_invalid = matches!(Caveat::decode(&text), Err(LsatError::InvalidCaveat { .. }));
        prop_assert!(is_invalid);
    }

    #[test]
    fn expirations_may_only_shrink(first in 0i64..1_000_000, second in 0i64..1_000_000) {
        let caveats = [Caveat::expiration(first), Caveat::expiration(second)];
        let satisfiers = SatisfierSet::new().with(ExpirationSatisfier);
        let mut ctx = SatisfierContext::new(0);

        prop_assert_eq!(check_caveats(&caveats, &satisfiers, &mut ctx).is_ok(), second <= first);
    }

    #[test]
    fn expiration_final_check_tracks_time(until in 0i64..1_000_000, now in 0i64..1_000_000) {
        let mut ctx = SatisfierContext::new(now);
        prop_assert_eq!(
            ExpirationSatisfier.satisfy_final(&Caveat::expiration(until), &mut ctx),
            until >= now
        );
    }

    #[test]
    fn origin_caveat_cannot_change(a in any::<[u8; 4]>(), b in any::<[u8; 4]>()) {
        let ctx = SatisfierContext::new(0);
        let first = Caveat::new("ip", std::net::Ipv4Addr::from(a).to_string());
        let second = Caveat::new("ip", std::net::Ipv4Addr::from(b).to_string());

        prop_assert_eq!(OriginSatisfier.satisfy_previous(&first, &second, &ctx), a == b);
    }
}
