//! Benchmark utilities.

use keel_core::RawRecordPayload;
use keel_testkit::{ident, payloads};

/// `count` person payloads with ids `1..=count`.
pub fn people(count: usize) -> Vec<RawRecordPayload> {
    (1..=count)
        .map(|i| payloads::person(&i.to_string(), &format!("person {i}")))
        .collect()
}

/// One post with `comments` comments, every comment pointing back at it.
pub fn post_with_comments(comments: usize) -> Vec<RawRecordPayload> {
    let ids: Vec<String> = (1..=comments).map(|i| i.to_string()).collect();
    let mut batch = vec![RawRecordPayload::new("post", "1")
        .attr("title", "benchmark")
        .many("comments", ids.iter().map(|id| ident("comment", id)).collect())];
    batch.extend(
        ids.iter()
            .map(|id| payloads::comment(id, &format!("comment {id}"), "1")),
    );
    batch
}
