use serde::{Deserialize, Serialize};

use crate::domain::stock::StockRating;

/// One page of the external ratings feed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedPage {
    #[serde(default)]
    pub items: Vec<StockRating>,
    /// Cursor for the following page. Empty on the last page.
    #[serde(default)]
    pub next_page: String,
}

impl FeedPage {
    pub fn is_last(&self) -> bool {
        self.next_page.trim().is_empty()
    }
}
