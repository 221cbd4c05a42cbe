//! llms.txt 与分段markdown渲染
//!
//! 输出布局：
//! - `llms.txt`：站点标题、描述，每个分类一节，每个分段一条链接
//! - `<classification>/<classification>-segment-<n>.md`：每页一行

use crawler_config::DomainConfig;
use crawler_domain::PublishedPage;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::PathBuf;

pub const INDEX_FILE: &str = "llms.txt";

#[derive(Debug, Clone, PartialEq)]
pub struct RenderedFile {
    /// 相对域名输出目录的路径
    pub path: PathBuf,
    pub contents: String,
}

#[derive(Debug, Clone, Default)]
pub struct RenderedSite {
    pub files: Vec<RenderedFile>,
    pub pages: usize,
    pub segments: usize,
}

pub fn segment_file_name(classification: &str, n: usize) -> String {
    format!("{classification}-segment-{n}.md")
}

/// 分类顺序：先按配置中sitemaps的顺序，未配置的分类按字母序排在后面
pub fn classification_order<'a>(
    domain: &DomainConfig,
    groups: &BTreeMap<&'a str, Vec<&'a PublishedPage>>,
) -> Vec<&'a str> {
    let mut order: Vec<&'a str> = domain
        .sitemaps
        .iter()
        .filter_map(|s| groups.get_key_value(s.name.as_str()).map(|(k, _)| *k))
        .collect();

    for key in groups.keys() {
        if !order.contains(key) {
            order.push(key);
        }
    }
    order
}

pub fn render(domain: &DomainConfig, pages: &[PublishedPage]) -> RenderedSite {
    let mut groups: BTreeMap<&str, Vec<&PublishedPage>> = BTreeMap::new();
    for page in pages {
        groups
            .entry(page.classification.as_str())
            .or_default()
            .push(page);
    }

    let segment_size = domain.segment_size.max(1);
    let mut site = RenderedSite {
        pages: pages.len(),
        ..Default::default()
    };

    let mut index = String::new();
    let _ = writeln!(index, "# {}", domain.title);
    if !domain.description.is_empty() {
        let _ = writeln!(index, "\n> {}", single_line(&domain.description));
    }

    for classification in classification_order(domain, &groups) {
        let entries = &groups[classification];
        let (title, description) = match domain.sitemap(classification) {
            Some(sitemap) => (sitemap.title.as_str(), sitemap.description.as_str()),
            None => (classification, ""),
        };

        let _ = writeln!(index, "\n## {title}\n");
        if !description.is_empty() {
            let _ = writeln!(index, "{}\n", single_line(description));
        }

        let chunks: Vec<&[&PublishedPage]> = entries.chunks(segment_size).collect();
        let total = chunks.len();
        for (i, chunk) in chunks.into_iter().enumerate() {
            let n = i + 1;
            let file_name = segment_file_name(classification, n);
            let _ = writeln!(
                index,
                "- [{title} ({n}/{total})]({})",
                segment_link(domain, classification, &file_name)
            );

            site.files.push(RenderedFile {
                path: PathBuf::from(classification).join(&file_name),
                contents: render_segment(title, n, total, chunk),
            });
            site.segments += 1;
        }
    }

    site.files.insert(
        0,
        RenderedFile {
            path: PathBuf::from(INDEX_FILE),
            contents: index,
        },
    );
    site
}

fn render_segment(title: &str, n: usize, total: usize, pages: &[&PublishedPage]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# {title} ({n}/{total})\n");
    for page in pages {
        let meta = &page.metadata;
        let _ = write!(out, "- [{}]({})", single_line(&meta.title), page.url);
        if let Some(description) = meta.description.as_deref().filter(|d| !d.trim().is_empty()) {
            let _ = write!(out, ": {}", single_line(description));
        }
        out.push('\n');
    }
    out
}

fn segment_link(domain: &DomainConfig, classification: &str, file_name: &str) -> String {
    let base = domain.llms_path.trim_matches('/');
    if base.is_empty() {
        format!("https://{}/{classification}/{file_name}", domain.domain)
    } else {
        format!("https://{}/{base}/{classification}/{file_name}", domain.domain)
    }
}

fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crawler_config::SitemapConfig;
    use crawler_domain::{Metadata, PageMetadata};
    use uuid::Uuid;

    fn domain() -> DomainConfig {
        DomainConfig {
            domain: "example.com".to_string(),
            priority: 1,
            segment_size: 2,
            title: "LLMS.TXT for example.com".to_string(),
            description: "Example   site\nwith pages".to_string(),
            llms_path: "llms".to_string(),
            sitemaps: vec![
                SitemapConfig {
                    name: "state".to_string(),
                    title: "State Pages".to_string(),
                    description: "Per state coverage".to_string(),
                },
                SitemapConfig {
                    name: "page".to_string(),
                    title: "General Pages".to_string(),
                    description: String::new(),
                },
            ],
        }
    }

    fn page(path: &str, classification: &str) -> PublishedPage {
        let page = PageMetadata {
            title: format!("Title {path}"),
            description: Some("desc".to_string()),
            ..Default::default()
        };
        PublishedPage {
            url: format!("https://example.com{path}"),
            classification: classification.to_string(),
            metadata: Metadata::from_page(Uuid::new_v4(), page),
        }
    }

    #[test]
    fn test_config_order_then_alphabetical() {
        let pages = vec![
            page("/z", "zeta"),
            page("/a", "alpha"),
            page("/p", "page"),
            page("/s", "state"),
        ];
        let site = render(&domain(), &pages);
        let dirs: Vec<String> = site
            .files
            .iter()
            .skip(1)
            .map(|f| f.path.parent().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(dirs, vec!["state", "page", "alpha", "zeta"]);
    }

    #[test]
    fn test_segments_split_by_size() {
        let pages = vec![page("/1", "page"), page("/2", "page"), page("/3", "page")];
        let site = render(&domain(), &pages);

        assert_eq!(site.pages, 3);
        assert_eq!(site.segments, 2);
        assert_eq!(site.files[0].path, PathBuf::from("llms.txt"));
        assert_eq!(
            site.files[1].path,
            PathBuf::from("page").join("page-segment-1.md")
        );
        assert_eq!(site.files[2].contents.lines().filter(|l| l.starts_with("- [")).count(), 1);

        let index = &site.files[0].contents;
        assert!(index.starts_with("# LLMS.TXT for example.com"));
        assert!(index.contains("> Example site with pages"));
        assert!(index.contains(
            "- [General Pages (2/2)](https://example.com/llms/page/page-segment-2.md)"
        ));
    }

    #[test]
    fn test_unconfigured_classification_uses_tag_as_title() {
        let site = render(&domain(), &[page("/x", "misc")]);
        assert!(site.files[0].contents.contains("## misc"));
        assert!(site.files[1]
            .contents
            .contains("- [Title /x](https://example.com/x): desc"));
    }

    #[test]
    fn test_empty_domain_renders_only_index() {
        let site = render(&domain(), &[]);
        assert_eq!(site.files.len(), 1);
        assert_eq!(site.segments, 0);
    }
}
