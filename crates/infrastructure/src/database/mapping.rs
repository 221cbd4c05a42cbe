//! 数据库行到领域实体的转换

use crawler_domain::{CrawlUrl, Metadata, PublishedPage, Task, TaskDetails, Worker};
use crawler_errors::CrawlerResult;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::Row;

pub const TASK_COLUMNS: &str =
    "id, task_type, name, description, status, position, details, error, created_at, updated_at";

pub const URL_COLUMNS: &str = "id, url, domain, status, priority, retries, lastmod, worker_id, \
     batch_id, worker_type, classification, created_at, updated_at";

pub const WORKER_COLUMNS: &str = "id, worker_type, instance_number, status, current_batch_id, \
     urls_processed, last_heartbeat, lease_holder, created_at, updated_at";

pub fn row_to_task(row: &PgRow) -> CrawlerResult<Task> {
    let details: Json<TaskDetails> = row.try_get("details")?;
    Ok(Task {
        id: row.try_get("id")?,
        task_type: row.try_get("task_type")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        status: row.try_get("status")?,
        position: row.try_get("position")?,
        details: details.0,
        error: row.try_get("error")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

pub fn row_to_url(row: &PgRow) -> CrawlerResult<CrawlUrl> {
    Ok(CrawlUrl {
        id: row.try_get("id")?,
        url: row.try_get("url")?,
        domain: row.try_get("domain")?,
        status: row.try_get("status")?,
        priority: row.try_get("priority")?,
        retries: row.try_get("retries")?,
        lastmod: row.try_get("lastmod")?,
        worker_id: row.try_get("worker_id")?,
        batch_id: row.try_get("batch_id")?,
        worker_type: row.try_get("worker_type")?,
        classification: row.try_get("classification")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

pub fn row_to_worker(row: &PgRow) -> CrawlerResult<Worker> {
    Ok(Worker {
        id: row.try_get("id")?,
        worker_type: row.try_get("worker_type")?,
        instance_number: row.try_get("instance_number")?,
        status: row.try_get("status")?,
        current_batch_id: row.try_get("current_batch_id")?,
        urls_processed: row.try_get("urls_processed")?,
        last_heartbeat: row.try_get("last_heartbeat")?,
        lease_holder: row.try_get("lease_holder")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// 需要 urls 与 metadata 联表查询的列
pub fn row_to_published(row: &PgRow) -> CrawlerResult<PublishedPage> {
    Ok(PublishedPage {
        url: row.try_get("url")?,
        classification: row.try_get("classification")?,
        metadata: Metadata {
            id: row.try_get("metadata_id")?,
            url_id: row.try_get("url_id")?,
            title: row.try_get("title")?,
            description: row.try_get("description")?,
            author: row.try_get("author")?,
            date: row.try_get("date")?,
            extras: row.try_get("extras")?,
            parsed_at: row.try_get("parsed_at")?,
        },
    })
}
