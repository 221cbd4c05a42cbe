//! URL分类与批次切分，纯函数，不访问存储

use regex::Regex;
use std::collections::HashMap;
use uuid::Uuid;

use crate::entities::{CrawlUrl, Worker};
use crawler_config::{WorkerTypeConfig, DEFAULT_WORKER_TYPE};
use crawler_errors::{CrawlerError, CrawlerResult};

/// 按配置顺序匹配worker类型的URL模式，先匹配者胜出
pub struct Classifier {
    types: Vec<(String, Vec<Regex>)>,
    fallback: Option<String>,
}

impl Classifier {
    pub fn new(workers: &[WorkerTypeConfig]) -> CrawlerResult<Self> {
        let mut types = Vec::with_capacity(workers.len());
        for worker in workers {
            let patterns = worker
                .url_patterns
                .iter()
                .map(|p| {
                    Regex::new(p).map_err(|e| {
                        CrawlerError::config_error(format!(
                            "worker类型 {} 的URL模式无效 {p}: {e}",
                            worker.name
                        ))
                    })
                })
                .collect::<CrawlerResult<Vec<_>>>()?;
            types.push((worker.name.clone(), patterns));
        }

        let fallback = workers
            .iter()
            .find(|w| w.name == DEFAULT_WORKER_TYPE)
            .map(|w| w.name.clone());

        Ok(Self { types, fallback })
    }

    pub fn classify(&self, url: &str) -> Option<&str> {
        self.types
            .iter()
            .find(|(_, patterns)| patterns.iter().any(|re| re.is_match(url)))
            .map(|(name, _)| name.as_str())
            .or(self.fallback.as_deref())
    }

    /// 按worker类型分组，保留输入顺序；未匹配的URL单独返回
    pub fn group<'a>(
        &self,
        urls: &'a [CrawlUrl],
    ) -> (HashMap<String, Vec<&'a CrawlUrl>>, Vec<&'a CrawlUrl>) {
        let mut groups: HashMap<String, Vec<&CrawlUrl>> = HashMap::new();
        let mut unmatched = Vec::new();
        for url in urls {
            match self.classify(&url.url) {
                Some(name) => groups.entry(name.to_string()).or_default().push(url),
                None => unmatched.push(url),
            }
        }
        (groups, unmatched)
    }
}

/// 一个待写入的批次
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedBatch {
    pub worker_id: Uuid,
    pub instance_number: i32,
    pub url_ids: Vec<Uuid>,
}

/// 把一种类型的URL均分到各实例（向上取整），再按batch_size切块
///
/// `instances` 需按 instance_number 升序；分不到URL的实例不会出现在结果中
pub fn plan_batches(url_ids: &[Uuid], instances: &[Worker], batch_size: usize) -> Vec<PlannedBatch> {
    if url_ids.is_empty() || instances.is_empty() || batch_size == 0 {
        return Vec::new();
    }

    let per_instance = url_ids.len().div_ceil(instances.len());
    url_ids
        .chunks(per_instance)
        .zip(instances)
        .flat_map(|(share, worker)| {
            share.chunks(batch_size).map(move |chunk| PlannedBatch {
                worker_id: worker.id,
                instance_number: worker.instance_number,
                url_ids: chunk.to_vec(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker_type(name: &str, patterns: &[&str]) -> WorkerTypeConfig {
        WorkerTypeConfig {
            name: name.to_string(),
            url_patterns: patterns.iter().map(|p| p.to_string()).collect(),
            priority: 0,
            batch_size: 2,
            concurrency: 1,
            instances: 1,
        }
    }

    fn ids(n: usize) -> Vec<Uuid> {
        (0..n).map(|_| Uuid::new_v4()).collect()
    }

    #[test]
    fn test_first_match_in_config_order() {
        let classifier = Classifier::new(&[
            worker_type("blog", &["/blog/"]),
            worker_type("catch_all", &[".*"]),
            worker_type("news", &["/blog/news"]),
        ])
        .unwrap();

        assert_eq!(classifier.classify("https://a.com/blog/news/1"), Some("blog"));
        assert_eq!(classifier.classify("https://a.com/about"), Some("catch_all"));
    }

    #[test]
    fn test_unmatched_falls_back_to_default() {
        let classifier = Classifier::new(&[
            worker_type("blog", &["/blog/"]),
            worker_type(DEFAULT_WORKER_TYPE, &["^$"]),
        ])
        .unwrap();
        assert_eq!(classifier.classify("https://a.com/x"), Some(DEFAULT_WORKER_TYPE));

        let classifier = Classifier::new(&[worker_type("blog", &["/blog/"])]).unwrap();
        assert_eq!(classifier.classify("https://a.com/x"), None);
    }

    #[test]
    fn test_group_reports_unmatched() {
        let classifier = Classifier::new(&[worker_type("blog", &["/blog/"])]).unwrap();
        let urls = vec![
            CrawlUrl::new("a.com", "https://a.com/blog/1", "page"),
            CrawlUrl::new("a.com", "https://a.com/about", "page"),
            CrawlUrl::new("a.com", "https://a.com/blog/2", "page"),
        ];
        let (groups, unmatched) = classifier.group(&urls);
        assert_eq!(groups["blog"].len(), 2);
        assert_eq!(groups["blog"][0].url, "https://a.com/blog/1");
        assert_eq!(unmatched.len(), 1);
    }

    #[test]
    fn test_five_urls_batch_size_two_single_instance() {
        let worker = Worker::new("default", 1);
        let url_ids = ids(5);
        let batches = plan_batches(&url_ids, &[worker.clone()], 2);

        let sizes: Vec<usize> = batches.iter().map(|b| b.url_ids.len()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert!(batches.iter().all(|b| b.worker_id == worker.id));
        assert_eq!(
            batches.iter().flat_map(|b| b.url_ids.clone()).collect::<Vec<_>>(),
            url_ids
        );
    }

    #[test]
    fn test_even_split_across_instances() {
        let workers: Vec<Worker> = (1..=3).map(|n| Worker::new("default", n)).collect();
        let batches = plan_batches(&ids(7), &workers, 10);

        // ceil(7/3) = 3 -> 3, 3, 1
        let shares: Vec<(i32, usize)> = batches
            .iter()
            .map(|b| (b.instance_number, b.url_ids.len()))
            .collect();
        assert_eq!(shares, vec![(1, 3), (2, 3), (3, 1)]);
    }

    #[test]
    fn test_instances_without_share_are_omitted() {
        let workers: Vec<Worker> = (1..=5).map(|n| Worker::new("default", n)).collect();
        let batches = plan_batches(&ids(2), &workers, 8000);

        let instances: Vec<i32> = batches.iter().map(|b| b.instance_number).collect();
        assert_eq!(instances, vec![1, 2]);
    }

    #[test]
    fn test_no_batch_exceeds_size_or_spans_instances() {
        let workers: Vec<Worker> = (1..=2).map(|n| Worker::new("t", n)).collect();
        let batches = plan_batches(&ids(11), &workers, 4);

        assert!(batches.iter().all(|b| b.url_ids.len() <= 4));
        // instance 1: 6 -> 4 + 2, instance 2: 5 -> 4 + 1
        let sizes: Vec<(i32, usize)> = batches
            .iter()
            .map(|b| (b.instance_number, b.url_ids.len()))
            .collect();
        assert_eq!(sizes, vec![(1, 4), (1, 2), (2, 4), (2, 1)]);
    }

    #[test]
    fn test_empty_inputs() {
        assert!(plan_batches(&[], &[Worker::new("t", 1)], 2).is_empty());
        assert!(plan_batches(&ids(3), &[], 2).is_empty());
    }
}
