mod api;
mod components;
mod error;
mod stream;
mod upload;

use std::rc::Rc;

use gloo_events::EventListener;
use gloo_file::{File as GlooFile, ObjectUrl};
use gloo_storage::{LocalStorage, Storage};
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::spawn_local;
use web_sys::{ClipboardEvent, DragEvent};
use yew::prelude::*;

use api::{ApiClient, UploadJob};
use components::utils::first_image_file;
use components::{header, results, upload_section, utils};
use shared::{
    MAX_SEGMENTS_DEFAULT, MAX_SEGMENTS_LIMIT, PredictResponse, ProgressUpdate, UploadOptions,
    parse_candidate_labels,
};

const LABELS_STORAGE_KEY: &str = "candidate_labels";
const MAX_SEGMENTS_STORAGE_KEY: &str = "max_segments";

// Models
struct SelectedFile {
    file: GlooFile,
    preview_url: ObjectUrl,
}

// Yew msg components
enum Msg {
    // File selection
    FileSelected(GlooFile),
    HandleDrop(DragEvent),
    HandlePaste(ClipboardEvent),

    // Analysis options
    SetLabels(String),
    SetMaxSegments(u32),

    // Job lifecycle: Submit starts one job; exactly one of
    // Completed/Failed arrives for it, after any number of Progress.
    Submit,
    Progress(ProgressUpdate),
    Completed(PredictResponse),
    Failed(String),

    // UI states
    SetError(Option<String>),
    SetDragging(bool),
    ToggleTheme,
}

// Main component
struct Model {
    client: Rc<ApiClient>,
    file: Option<SelectedFile>,
    labels_input: String,
    max_segments: u32,
    uploading: bool,
    progress: Option<u32>,
    progress_message: String,
    result: Option<PredictResponse>,
    error: Option<String>,
    is_dragging: bool,
    theme: String,
    paste_listener: Option<EventListener>,
}

// Yew component implementation
impl Component for Model {
    type Message = Msg;
    type Properties = ();

    fn create(ctx: &Context<Self>) -> Self {
        let labels_input: String = LocalStorage::get(LABELS_STORAGE_KEY).unwrap_or_default();
        let max_segments: u32 = LocalStorage::get(MAX_SEGMENTS_STORAGE_KEY)
            .unwrap_or(MAX_SEGMENTS_DEFAULT)
            .clamp(1, MAX_SEGMENTS_LIMIT);

        let link = ctx.link().clone();
        let window = web_sys::window().expect("no global `window` exists");
        let listener = EventListener::new(&window, "paste", move |event| {
            if let Some(clipboard_event) = event.dyn_ref::<ClipboardEvent>() {
                link.send_message(Msg::HandlePaste(clipboard_event.clone()));
            }
        });

        Self {
            client: Rc::new(ApiClient::default()),
            file: None,
            labels_input,
            max_segments,
            uploading: false,
            progress: None,
            progress_message: String::new(),
            result: None,
            error: None,
            is_dragging: false,
            theme: "light".to_string(),
            paste_listener: Some(listener),
        }
    }

    fn update(&mut self, ctx: &Context<Self>, msg: Self::Message) -> bool {
        match msg {
            // File selection
            Msg::FileSelected(file) => self.handle_file_selected(file),
            Msg::HandleDrop(event) => self.handle_drop(ctx, event),
            Msg::HandlePaste(event) => self.handle_paste(ctx, event),

            // Analysis options
            Msg::SetLabels(labels) => {
                self.labels_input = labels;
                true
            }
            Msg::SetMaxSegments(value) => {
                self.max_segments = value;
                true
            }

            // Job lifecycle
            Msg::Submit => self.handle_submit(ctx),
            Msg::Progress(update) => self.handle_progress(update),
            Msg::Completed(result) => self.handle_completed(result),
            Msg::Failed(message) => self.handle_failed(message),

            // UI states
            Msg::SetError(error) => {
                self.error = error;
                true
            }
            Msg::SetDragging(is_dragging) => {
                self.is_dragging = is_dragging;
                true
            }
            Msg::ToggleTheme => self.handle_toggle_theme(),
        }
    }

    fn view(&self, ctx: &Context<Self>) -> Html {
        html! {
            <div class="container">
                { header::render_header() }
                { self.render_theme_toggle(ctx) }

                <main class="main-content">
                    { upload_section::render_upload_section(self, ctx) }
                    { utils::render_error_message(self) }
                    { results::render_results(self) }
                </main>

                <footer class="app-footer">
                    <p>{"Image Segmentation Demo | Fullstack Rust WASM"}</p>
                </footer>
            </div>
        }
    }
}

// Handler methods
impl Model {
    fn handle_file_selected(&mut self, file: GlooFile) -> bool {
        let preview_url = ObjectUrl::from(file.clone());
        self.file = Some(SelectedFile { file, preview_url });
        self.error = None;
        true
    }

    fn handle_drop(&mut self, ctx: &Context<Self>, event: DragEvent) -> bool {
        event.prevent_default();
        self.is_dragging = false;

        if let Some(data_transfer) = event.data_transfer() {
            if let Some(file_list) = data_transfer.files() {
                match first_image_file(&file_list) {
                    Some(file) => ctx.link().send_message(Msg::FileSelected(file)),
                    None => ctx
                        .link()
                        .send_message(Msg::SetError(Some("No valid image file dropped.".into()))),
                }
            }
        }

        true
    }

    fn handle_paste(&mut self, ctx: &Context<Self>, event: ClipboardEvent) -> bool {
        if let Some(data_transfer) = event.clipboard_data() {
            if let Some(file_list) = data_transfer.files() {
                if let Some(file) = first_image_file(&file_list) {
                    event.prevent_default();
                    ctx.link().send_message(Msg::FileSelected(file));
                    return true;
                }
            }
        }
        false
    }

    fn handle_submit(&mut self, ctx: &Context<Self>) -> bool {
        if self.uploading {
            return false;
        }
        let Some(selected) = &self.file else {
            self.error = Some("Please choose an image file.".to_string());
            return true;
        };

        let options = UploadOptions {
            candidate_labels: parse_candidate_labels(&self.labels_input),
            max_segments: self.max_segments.clamp(1, MAX_SEGMENTS_LIMIT),
        };
        self.persist_options();

        let job = UploadJob::new(selected.file.clone(), options);
        self.uploading = true;
        self.error = None;
        self.result = None;
        self.progress = Some(0);
        self.progress_message = "Starting analysis...".to_string();

        let link = ctx.link().clone();
        let client = Rc::clone(&self.client);
        spawn_local(async move {
            let progress_link = link.clone();
            let outcome = upload::submit(&client, job, move |update| {
                progress_link.send_message(Msg::Progress(update));
            })
            .await;

            match outcome {
                Ok(result) => link.send_message(Msg::Completed(result)),
                Err(err) => link.send_message(Msg::Failed(err.to_string())),
            }
        });

        true
    }

    fn handle_progress(&mut self, update: ProgressUpdate) -> bool {
        if !self.uploading {
            return false;
        }
        if let Some(percent) = update.progress {
            self.progress = Some(percent);
        }
        self.progress_message = if update.message.is_empty() {
            update.stage.to_string()
        } else {
            update.message
        };
        true
    }

    fn handle_completed(&mut self, result: PredictResponse) -> bool {
        self.uploading = false;
        self.progress = None;
        self.progress_message.clear();
        self.result = Some(result);
        true
    }

    fn handle_failed(&mut self, message: String) -> bool {
        self.uploading = false;
        self.progress = None;
        self.progress_message.clear();
        self.error = Some(message);
        true
    }

    fn handle_toggle_theme(&mut self) -> bool {
        let body = web_sys::window().unwrap().document().unwrap().body().unwrap();

        if self.theme == "light" {
            self.theme = "dark".to_string();
            body.class_list().add_1("dark-mode").unwrap();
        } else {
            self.theme = "light".to_string();
            body.class_list().remove_1("dark-mode").unwrap();
        }

        true
    }

    fn persist_options(&self) {
        if let Err(err) = LocalStorage::set(LABELS_STORAGE_KEY, &self.labels_input) {
            log::warn!("failed to persist candidate labels: {err}");
        }
        if let Err(err) = LocalStorage::set(MAX_SEGMENTS_STORAGE_KEY, self.max_segments) {
            log::warn!("failed to persist max segments: {err}");
        }
    }
}

// Rendering methods
impl Model {
    fn render_theme_toggle(&self, ctx: &Context<Self>) -> Html {
        let link = ctx.link();

        html! {
            <div class="top-right">
                <button
                    id="theme-toggle"
                    class="theme-toggle"
                    onclick={link.callback(|_| Msg::ToggleTheme)}
                    title={ if self.theme == "light" { "Switch to Dark Mode" } else { "Switch to Light Mode" } }
                >
                    { if self.theme == "light" {
                        html! { <i class="fa-solid fa-sun"></i> }
                    } else {
                        html! { <i class="fa-solid fa-moon"></i> }
                    }}
                </button>
            </div>
        }
    }
}

fn main() {
    wasm_logger::init(wasm_logger::Config::default());
    log::info!("App starting...");
    yew::Renderer::<Model>::new().render();
}
