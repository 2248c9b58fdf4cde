mod common;

use common::{harness, FakeRemote};
use outreach_sync::NewCompany;
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// N candidates, M of which reuse an existing address (in any case),
    /// yield exactly N - M additions.
    #[test]
    fn prop_bulk_add_counts(
        existing in 1usize..5,
        collisions in prop::collection::vec((0usize..5, any::<bool>()), 0..6),
        fresh in 0usize..6,
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        runtime.block_on(async {
            let h = harness(FakeRemote::new()).await;
            h.engine.bootstrap().await.unwrap();

            for i in 0..existing {
                h.engine
                    .add_company(NewCompany::new(
                        format!("Existing {i}"),
                        vec![format!("taken{i}@x.test")],
                    ))
                    .await
                    .unwrap();
            }

            let mut items = Vec::new();
            for (n, (target, shout)) in collisions.iter().enumerate() {
                let address = format!("taken{}@x.test", target % existing);
                let address = if *shout { address.to_uppercase() } else { address };
                items.push(NewCompany::new(
                    format!("Dup {n}"),
                    vec![format!("own{n}@dup.test"), address],
                ));
            }
            for n in 0..fresh {
                items.push(NewCompany::new(
                    format!("Fresh {n}"),
                    vec![format!("fresh{n}@new.test")],
                ));
            }

            let report = h.engine.bulk_add_companies(items).await.unwrap();

            prop_assert_eq!(report.added, fresh);
            prop_assert_eq!(report.skipped, collisions.len());
            prop_assert!(report.rejected.is_empty());
            prop_assert_eq!(h.engine.get_companies().await.len(), existing + fresh);
            Ok(())
        })?;
    }
}
