use yew::prelude::*;

/// Renders the application header
pub fn render_header() -> Html {
    html! {
        <header class="app-header">
            <h1><i class="fa-solid fa-object-group"></i> {" Image Segmentation & Labeling"}</h1>
            <p class="subtitle">{"Upload an image to detect, segment and label objects"}</p>
        </header>
    }
}
