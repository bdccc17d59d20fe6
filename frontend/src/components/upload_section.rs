use super::super::Model;
use super::super::Msg;
use super::utils::{debounce, first_image_file};
use shared::{MAX_SEGMENTS_DEFAULT, MAX_SEGMENTS_LIMIT};
use wasm_bindgen::JsCast;
use web_sys::{DragEvent, HtmlInputElement};
use yew::prelude::*;

pub fn render_upload_section(model: &Model, ctx: &Context<Model>) -> Html {
    html! {
        <div class="upload-section">
            { render_file_input_area(model, ctx) }
            { render_options(model, ctx) }
            { render_submit_row(model, ctx) }
        </div>
    }
}

fn render_file_input_area(model: &Model, ctx: &Context<Model>) -> Html {
    let link = ctx.link();
    let handle_change = link.callback(|e: Event| {
        let input: HtmlInputElement = e.target_unchecked_into();
        let selected = input.files().as_ref().and_then(first_image_file);

        input.set_value("");

        match selected {
            Some(file) => Msg::FileSelected(file),
            None => Msg::SetError(Some("No valid image file selected.".into())),
        }
    });

    let handle_drag_over = link.callback(|e: DragEvent| {
        e.prevent_default();
        Msg::SetDragging(true)
    });

    let handle_drag_leave = link.callback(|e: DragEvent| {
        e.prevent_default();
        Msg::SetDragging(false)
    });

    let handle_drop = link.callback(Msg::HandleDrop);
    let trigger_file_input = Callback::from(|_| {
        if let Some(input) = web_sys::window()
            .unwrap()
            .document()
            .unwrap()
            .get_element_by_id("file-input")
        {
            if let Ok(html_input) = input.dyn_into::<web_sys::HtmlElement>() {
                html_input.click();
            }
        }
    });

    html! {
        <>
            <input
                type="file"
                id="file-input"
                accept="image/*"
                style="display: none;"
                onchange={handle_change}
            />

            <div
                id="drop-zone"
                class={classes!("upload-area", model.is_dragging.then_some("drag-over"))}
                ondragover={handle_drag_over}
                ondragleave={handle_drag_leave}
                ondrop={handle_drop}
                onclick={debounce(300, {
                    let trigger_file_input = trigger_file_input.clone();
                    move || trigger_file_input.emit(())
                })}
            >
                {
                    if let Some(selected) = &model.file {
                        html! {
                            <div class="upload-placeholder">
                                <img
                                    src={selected.preview_url.to_string()}
                                    alt={selected.file.name()}
                                    class="upload-preview"
                                />
                                <p class="selected-file-name">{ selected.file.name() }</p>
                                <p class="file-types">{"Drop or click to replace"}</p>
                            </div>
                        }
                    } else {
                        html! {
                            <div class="upload-placeholder">
                                <i class="fa-solid fa-cloud-arrow-up"></i>
                                <p>{"Drag & drop an image here, paste, or click"}</p>
                                <p class="file-types">{"Supported formats: JPG, PNG, WEBP, GIF"}</p>
                            </div>
                        }
                    }
                }
            </div>
        </>
    }
}

fn render_options(model: &Model, ctx: &Context<Model>) -> Html {
    let link = ctx.link();
    let on_labels = link.callback(|e: Event| {
        let input: HtmlInputElement = e.target_unchecked_into();
        Msg::SetLabels(input.value())
    });
    let on_max_segments = link.callback(|e: Event| {
        let input: HtmlInputElement = e.target_unchecked_into();
        let value = input
            .value()
            .parse::<u32>()
            .unwrap_or(MAX_SEGMENTS_DEFAULT)
            .clamp(1, MAX_SEGMENTS_LIMIT);
        Msg::SetMaxSegments(value)
    });

    html! {
        <div class="options-grid">
            <div class="option-field">
                <label for="candidate-labels">{"Candidate labels (comma-separated)"}</label>
                <p class="option-hint">
                    {"Leave empty to use default labels. Predictions are mapped onto your labels."}
                </p>
                <input
                    type="text"
                    id="candidate-labels"
                    placeholder="e.g. car, cat, dog, person, tree"
                    value={model.labels_input.clone()}
                    onchange={on_labels}
                />
            </div>
            <div class="option-field">
                <label for="max-segments">{"Max segments"}</label>
                <input
                    type="number"
                    id="max-segments"
                    min="1"
                    max={MAX_SEGMENTS_LIMIT.to_string()}
                    value={model.max_segments.to_string()}
                    onchange={on_max_segments}
                />
            </div>
        </div>
    }
}

fn render_submit_row(model: &Model, ctx: &Context<Model>) -> Html {
    let link = ctx.link().clone();

    html! {
        <div class="button-container">
            <button
                class="analyze-btn"
                disabled={model.uploading || model.file.is_none()}
                onclick={debounce(300, {
                    let link = link.clone();
                    move || link.callback(|_| Msg::Submit).emit(())
                })}
            >
                {
                    if model.uploading {
                        html! { <><i class="fa-solid fa-spinner fa-spin"></i>{" Analyzing..."}</> }
                    } else {
                        html! { <><i class="fa-solid fa-magnifying-glass"></i>{" Analyze Image"}</> }
                    }
                }
            </button>
            { render_progress(model) }
        </div>
    }
}

fn render_progress(model: &Model) -> Html {
    if !model.uploading {
        return html! {};
    }

    let percent = model.progress.unwrap_or(0);
    html! {
        <div class="progress-indicator">
            <div class="progress-bar">
                <div class="progress-fill" style={format!("width: {percent}%")}></div>
            </div>
            <span class="progress-value">{ format!("{percent}%") }</span>
            {
                if model.progress_message.is_empty() {
                    html! {}
                } else {
                    html! { <span class="progress-message">{ model.progress_message.clone() }</span> }
                }
            }
        </div>
    }
}
