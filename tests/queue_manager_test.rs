mod common;

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, Utc};

use auto_apply::models::{JobStatus, NewJob};
use auto_apply::store::{InMemoryJobStore, JobStore};
use auto_apply::QueueManager;

fn queue() -> Arc<QueueManager> {
    Arc::new(QueueManager::new(Arc::new(InMemoryJobStore::new())))
}

fn job(n: usize, priority: i32) -> NewJob {
    NewJob::new(
        format!("https://boards.greenhouse.io/acme/jobs/{}", n),
        format!("Engineer {}", n),
        "Acme",
        priority,
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_claims_are_exactly_once() {
    let queue = queue();
    for n in 0..20 {
        queue.enqueue(job(n, 5)).await.unwrap();
    }

    // 8 个 worker 同时抢 20 个职位
    let mut handles = Vec::new();
    for _ in 0..8 {
        let queue = Arc::clone(&queue);
        handles.push(tokio::spawn(async move {
            let mut claimed = Vec::new();
            while let Some(job) = queue.claim_next().await.unwrap() {
                claimed.push(job.id);
            }
            claimed
        }));
    }

    let mut all = Vec::new();
    for handle in handles {
        all.extend(handle.await.unwrap());
    }
    let unique: HashSet<_> = all.iter().collect();
    assert_eq!(all.len(), 20);
    assert_eq!(unique.len(), 20);
    assert_eq!(queue.stats().await.unwrap().applying, 20);
}

#[tokio::test]
async fn claims_highest_priority_then_score_then_oldest() {
    let queue = queue();
    let low = queue.enqueue(job(1, 3)).await.unwrap();
    let unscored = queue.enqueue(job(2, 8)).await.unwrap();
    let scored = queue
        .enqueue(job(3, 8).with_match_score(0.9))
        .await
        .unwrap();
    let older_low_score = queue
        .enqueue(job(4, 8).with_match_score(0.4))
        .await
        .unwrap();

    let order: Vec<_> = [
        queue.claim_next().await.unwrap(),
        queue.claim_next().await.unwrap(),
        queue.claim_next().await.unwrap(),
        queue.claim_next().await.unwrap(),
    ]
    .into_iter()
    .map(|j| j.unwrap().id)
    .collect();

    // 同优先级：有分数的在前，没有分数的排最后
    assert_eq!(order, vec![scored, older_low_score, unscored, low]);
    assert!(queue.claim_next().await.unwrap().is_none());
}

#[tokio::test]
async fn enqueue_same_url_merges_and_keeps_max_priority() {
    let queue = queue();
    let first = queue.enqueue(job(7, 4)).await.unwrap();
    let second = queue.enqueue(job(7, 9)).await.unwrap();
    let third = queue.enqueue(job(7, 2)).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first, third);

    let stats = queue.stats().await.unwrap();
    assert_eq!(stats.total(), 1);

    let stored = queue.store().get_job(first).await.unwrap();
    assert_eq!(stored.priority, 9);
    assert_eq!(stored.status, JobStatus::Queued);
}

#[tokio::test]
async fn rediscovered_expired_job_goes_back_to_queue() {
    let queue = queue();
    let id = queue.enqueue(job(11, 5)).await.unwrap();
    queue.claim_next().await.unwrap();
    queue.mark_expired(id).await.unwrap();
    assert!(queue.claim_next().await.unwrap().is_none());

    queue.enqueue(job(11, 5)).await.unwrap();
    let revived = queue.claim_next().await.unwrap().unwrap();
    assert_eq!(revived.id, id);
}

#[tokio::test]
async fn applied_job_is_not_revived_by_enqueue() {
    let queue = queue();
    let id = queue.enqueue(job(12, 5)).await.unwrap();
    queue.claim_next().await.unwrap();
    queue.mark_applied(id).await.unwrap();

    queue.enqueue(job(12, 10)).await.unwrap();
    let stored = queue.store().get_job(id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Applied);
    assert!(queue.claim_next().await.unwrap().is_none());
}

#[tokio::test]
async fn past_deadline_is_skipped() {
    let queue = queue();
    queue
        .enqueue(job(20, 10).with_deadline(Utc::now() - Duration::hours(1)))
        .await
        .unwrap();
    let open = queue
        .enqueue(job(21, 1).with_deadline(Utc::now() + Duration::days(3)))
        .await
        .unwrap();

    assert_eq!(queue.claim_next().await.unwrap().unwrap().id, open);
    assert!(queue.claim_next().await.unwrap().is_none());
}

#[tokio::test]
async fn mark_failed_appends_reason_to_notes() {
    let queue = queue();
    let id = queue.enqueue(job(30, 5)).await.unwrap();
    queue.claim_next().await.unwrap();

    let failed = queue.mark_failed(id, "表单结构变化").await.unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert!(failed.notes.contains("表单结构变化"));

    // 失败不会自动回到队列
    assert!(queue.claim_next().await.unwrap().is_none());

    let requeued = queue.requeue(id).await.unwrap();
    assert!(requeued.notes.contains("表单结构变化"));
    assert!(requeued.notes.contains("重新入队"));
}

#[tokio::test]
async fn release_returns_claim_to_queue() {
    let queue = queue();
    let id = queue.enqueue(job(40, 5)).await.unwrap();
    queue.claim_next().await.unwrap();
    tokio_test::assert_ok!(queue.release(id).await);
    tokio_test::assert_err!(queue.mark_applied(id).await);
    assert_eq!(queue.claim_next().await.unwrap().unwrap().id, id);
}

#[tokio::test]
async fn enqueue_all_counts_accepted_jobs() {
    let queue = queue();
    let count = queue
        .enqueue_all(vec![job(50, 5), job(51, 5), job(50, 7)])
        .await;
    assert_eq!(count, 3);
    assert_eq!(queue.list_queued(10).await.unwrap().len(), 2);
}
