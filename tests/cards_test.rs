//! Result Renderer Integration Tests
//!
//! Search payloads as the identity graph returns them, rendered to cards.

use labbybot::cards::{Element, Inline};
use labbybot::{render_search_results, SearchResultSet};
use serde_json::json;

fn results(value: serde_json::Value) -> SearchResultSet {
    SearchResultSet::from_value(&value).unwrap()
}

fn header(card: &labbybot::Card) -> String {
    match &card.body()[0] {
        Element::TextBlock(block) => block.text.clone(),
        other => panic!("expected header text, got {:?}", other),
    }
}

fn item_titles(card: &labbybot::Card) -> Vec<String> {
    let Element::Container(list) = &card.body()[1] else {
        panic!("expected result list");
    };
    list.items
        .iter()
        .map(|item| match item {
            Element::Container(hit) => match &hit.items[0] {
                Element::TextBlock(title) => title.text.clone(),
                other => panic!("unexpected title {:?}", other),
            },
            other => panic!("unexpected item {:?}", other),
        })
        .collect()
}

#[test]
fn test_single_hit() {
    let card = render_search_results(&results(json!({
        "value": [{
            "searchTerms": "labby",
            "hitsContainers": [{
                "total": 1,
                "hits": [{
                    "resource": {
                        "name": "VM1",
                        "webUrl": "http://x",
                        "lastModifiedDateTime": "2024-01-01",
                        "lastModifiedBy": { "user": { "displayName": "Alice" } }
                    },
                    "summary": "a vm"
                }]
            }]
        }]
    })));

    assert_eq!(header(&card), "Search results for: labby");
    assert_eq!(item_titles(&card), vec!["VM1"]);

    let json = card.to_json();
    let hit = &json["body"][1]["items"][0];
    assert_eq!(hit["items"][2]["facts"][0]["value"], "2024-01-01");
    assert_eq!(hit["items"][2]["facts"][1]["value"], "Alice");
    assert_eq!(hit["items"][3]["actions"][0]["url"], "http://x");
}

#[test]
fn test_no_hits_renders_empty_list() {
    let card = render_search_results(&results(json!({
        "value": [{ "searchTerms": "q", "hitsContainers": [{ "total": 0, "hits": [] }] }]
    })));

    assert_eq!(header(&card), "Search results for: q");
    assert!(item_titles(&card).is_empty());
}

#[test]
fn test_empty_value() {
    let card = render_search_results(&results(json!({ "value": [] })));
    assert_eq!(header(&card), "Search results for: ");
    assert!(item_titles(&card).is_empty());
}

#[test]
fn test_hits_keep_source_order_across_containers() {
    let hit = |name: &str| json!({ "resource": { "name": name }, "summary": "" });
    let card = render_search_results(&results(json!({
        "value": [
            {
                "searchTerms": "first",
                "hitsContainers": [
                    { "total": 2, "hits": [hit("a"), hit("b")] },
                    { "total": 0, "hits": [hit("skipped")] }
                ]
            },
            {
                "searchTerms": "second",
                "hitsContainers": [{ "total": 1, "hits": [hit("c")] }]
            }
        ]
    })));

    assert_eq!(item_titles(&card), vec!["a", "b", "c"]);
}

#[test]
fn test_last_container_terms_win() {
    let card = render_search_results(&results(json!({
        "value": [
            { "searchTerms": "alpha", "hitsContainers": [] },
            { "searchTerms": "omega", "hitsContainers": [] }
        ]
    })));
    assert_eq!(header(&card), "Search results for: omega");
}

#[test]
fn test_summary_is_a_text_run() {
    let card = render_search_results(&results(json!({
        "value": [{
            "searchTerms": "x",
            "hitsContainers": [{ "total": 1, "hits": [{ "summary": "<c0>vm</c0> notes" }] }]
        }]
    })));

    let Element::Container(list) = &card.body()[1] else {
        panic!("expected result list");
    };
    let Element::Container(hit) = &list.items[0] else {
        panic!("expected hit container");
    };
    let Element::RichTextBlock(rich) = &hit.items[1] else {
        panic!("expected rich text");
    };
    assert_eq!(
        rich.inlines,
        vec![Inline::TextRun {
            text: "<c0>vm</c0> notes".into()
        }]
    );
}
