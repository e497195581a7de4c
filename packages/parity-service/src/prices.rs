use serde::Serialize;

use crate::{ParityService, ServiceResult};
use parity_domain::overlap::PriceSnapshot;

/// Effective prices of one store.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StorePrices {
	pub store_id: i64,
	pub group_id: Option<i64>,
	/// Anchor whose prices back this answer, when it is not the store itself.
	pub resolved_via: Option<i64>,
	pub prices: PriceSnapshot,
}

impl ParityService {
	/// Current prices at `store_id`.
	///
	/// Confirmed members have their own rows pruned, so prices are read through the group anchor.
	/// Rows the store still holds take precedence over the anchor's.
	pub async fn price_at(&self, store_id: i64) -> ServiceResult<StorePrices> {
		let group = self.store.group_of_store(store_id).await?;
		let group_id = group.as_ref().map(|group| group.group_id);
		let anchor = group
			.as_ref()
			.and_then(|group| group.resolved_anchor())
			.filter(|&anchor| anchor != store_id);
		let fetch = match anchor {
			Some(anchor) => vec![store_id, anchor],
			None => vec![store_id],
		};
		let mut snapshots = self.store.snapshots(&fetch, None).await?;
		let own = snapshots.remove(&store_id).unwrap_or_default();
		let prices = match anchor.and_then(|anchor| snapshots.remove(&anchor)) {
			Some(mut anchor_prices) => {
				anchor_prices.extend(own);

				anchor_prices
			},
			None => own,
		};

		Ok(StorePrices { store_id, group_id, resolved_via: anchor, prices })
	}
}
