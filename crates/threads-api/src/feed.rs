use threads_types::models::{FeedItem, Post, Repost};

/// Interleave posts and reposts newest first.
///
/// `sort_by` is stable and compares timestamps only, so on a tie posts stay
/// ahead of reposts and each input keeps its own relative order.
pub fn merge_feed(posts: Vec<Post>, reposts: Vec<Repost>) -> Vec<FeedItem> {
    let mut feed: Vec<FeedItem> = posts
        .into_iter()
        .map(FeedItem::Post)
        .chain(reposts.into_iter().map(FeedItem::Repost))
        .collect();

    feed.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
    feed
}
