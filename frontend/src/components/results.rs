use std::collections::HashMap;

use super::super::Model;
use super::utils::{format_percent, resolve_static_url, round3};
use shared::{PredictResponse, Segment};
use yew::prelude::*;

pub fn render_results(model: &Model) -> Html {
    let Some(response) = &model.result else {
        return html! {};
    };
    let base_url = model.client.base_url();

    html! {
        <div class="results-container">
            <div class="result-header">
                <h2><i class="fa-solid fa-layer-group"></i>{" Analysis Results"}</h2>
                { render_totals(response) }
            </div>

            <div class="analyzed-image">
                <img
                    src={resolve_static_url(&response.image_path, base_url)}
                    alt="Analyzed image"
                />
            </div>

            <div class="counts-row">
                { render_counts_panel("Detected classes", &response.counts.resnet) }
                { render_counts_panel("Mapped labels", &response.counts.mapped) }
            </div>

            {
                if response.candidate_labels.is_empty() {
                    html! {}
                } else {
                    html! {
                        <p class="used-labels">
                            {"Labels used: "}{ response.candidate_labels.join(", ") }
                        </p>
                    }
                }
            }

            <div class="segment-grid">
                { for response.segments.iter().enumerate().map(|(index, segment)| {
                    render_segment_card(index, segment, base_url)
                })}
            </div>
        </div>
    }
}

fn render_totals(response: &PredictResponse) -> Html {
    match &response.totals {
        Some(totals) => html! {
            <p class="totals-bar">
                { format!("Showing {} of {} detected segments", totals.returned, totals.detected) }
            </p>
        },
        None => html! {
            <p class="totals-bar">
                { format!("{} segments", response.segments.len()) }
            </p>
        },
    }
}

fn render_counts_panel(title: &str, counts: &HashMap<String, u32>) -> Html {
    if counts.is_empty() {
        return html! {
            <div class="counts-panel">
                <h3>{ title }</h3>
                <p class="no-results-message">{"No predictions"}</p>
            </div>
        };
    }

    let mut entries: Vec<(&String, &u32)> = counts.iter().collect();
    entries.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));

    html! {
        <div class="counts-panel">
            <h3>{ title }</h3>
            <ul>
                { for entries.iter().map(|(label, count)| html! {
                    <li key={(*label).clone()}>
                        <span class="count-label">{ label }</span>
                        <span class="count-value">{ *count }</span>
                    </li>
                })}
            </ul>
        </div>
    }
}

fn render_segment_card(index: usize, segment: &Segment, base_url: &str) -> Html {
    let bbox = &segment.bbox;
    let title = segment
        .mapped_label
        .as_deref()
        .or(segment.label.as_deref())
        .unwrap_or("(no prediction)");

    html! {
        <div class="segment-card" key={index.to_string()}>
            <img
                src={resolve_static_url(&segment.mask_path, base_url)}
                alt={format!("Mask for segment {index}")}
                class="mask-preview"
            />
            <div class="segment-body">
                <h4>{ format!("#{index} {title}") }</h4>
                {
                    match (&segment.label, &segment.mapped_label) {
                        (Some(label), Some(mapped)) if label != mapped => html! {
                            <p class="segment-sublabel">{ format!("{label} → {mapped}") }</p>
                        },
                        _ => html! {},
                    }
                }
                <p class="segment-box">
                    { format!(
                        "box ({}, {}) - ({}, {}) · score {}",
                        round3(bbox.x1), round3(bbox.y1),
                        round3(bbox.x2), round3(bbox.y2),
                        round3(bbox.score)
                    )}
                </p>
                { render_score_list("ResNet", &segment.resnet_probs) }
                { render_score_list("Zero-shot", &segment.zeroshot_scores) }
            </div>
        </div>
    }
}

/// The three strongest scores of one classifier, strongest first.
fn render_score_list(title: &str, scores: &HashMap<String, f64>) -> Html {
    if scores.is_empty() {
        return html! {};
    }

    let mut entries: Vec<(&String, &f64)> = scores.iter().collect();
    entries.sort_by(|a, b| b.1.partial_cmp(a.1).unwrap_or(std::cmp::Ordering::Equal));
    entries.truncate(3);

    html! {
        <div class="score-list">
            <span class="score-title">{ title }</span>
            { for entries.iter().map(|(label, score)| html! {
                <span class="score-entry" key={(*label).clone()}>
                    { format!("{label} {}", format_percent(**score)) }
                </span>
            })}
        </div>
    }
}
