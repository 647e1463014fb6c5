//! DOM-skeleton extraction and greedy similarity clustering of pages.

use scraper::{ElementRef, Html};
use similar::{capture_diff_slices, get_diff_ratio, Algorithm};
use uuid::Uuid;

/// Two structures belong to the same cluster when their diff ratio is at
/// least this value, pairwise against every existing member.
pub const SIMILARITY_THRESHOLD: f32 = 0.80;

/// Walks the element tree depth-first and emits one `depth:tag` token per
/// element. Text and attributes are ignored, so the tokens capture layout
/// skeleton only.
pub fn page_structure(body: &str) -> Vec<String> {
    let document = Html::parse_document(body);
    let mut tokens = Vec::new();
    walk(document.root_element(), 0, &mut tokens);
    tokens
}

fn walk(element: ElementRef<'_>, depth: usize, out: &mut Vec<String>) {
    out.push(format!("{}:{}", depth, element.value().name()));
    for child in element.children() {
        if let Some(child_element) = ElementRef::wrap(child) {
            walk(child_element, depth + 1, out);
        }
    }
}

/// LCS-based diff ratio in [0, 1] between two token sequences.
pub fn similarity(a: &[String], b: &[String]) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let ops = capture_diff_slices(Algorithm::Myers, a, b);
    get_diff_ratio(&ops, a.len(), b.len())
}

/// Greedy single-pass clustering. `pages` must already be in a stable order;
/// each page joins the first cluster whose every member it matches, else it
/// founds a new cluster under a fresh UUID.
pub fn cluster_pages(pages: &[(String, Vec<String>)]) -> Vec<(String, Vec<String>)> {
    let mut clusters: Vec<(String, Vec<usize>)> = Vec::new();

    for (index, (_, structure)) in pages.iter().enumerate() {
        let found = clusters.iter_mut().find(|(_, members)| {
            members
                .iter()
                .all(|&member| similarity(structure, &pages[member].1) >= SIMILARITY_THRESHOLD)
        });
        match found {
            Some((_, members)) => members.push(index),
            None => clusters.push((Uuid::new_v4().to_string(), vec![index])),
        }
    }

    clusters
        .into_iter()
        .map(|(id, members)| {
            let urls = members
                .into_iter()
                .map(|member| pages[member].0.clone())
                .collect();
            (id, urls)
        })
        .collect()
}
