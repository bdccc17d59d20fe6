use super::super::Model;
use gloo_file::File as GlooFile;
use gloo_timers::callback::Timeout;
use std::cell::RefCell;
use std::rc::Rc;
use web_sys::FileList;
use yew::prelude::*;

/// Resolves a server-relative asset reference (image or mask path) against
/// the configured base URL. Absolute http(s) references pass through
/// untouched; otherwise leading slashes are stripped, `../` segments
/// dropped and repeated separators collapsed before joining.
pub fn resolve_static_url(path: &str, base_url: &str) -> String {
    if path.is_empty() {
        return String::new();
    }
    let lower = path.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        return path.to_string();
    }

    let cleaned = clean_path(path);
    let base = base_url.trim_end_matches('/');
    format!("{base}/{cleaned}")
}

fn clean_path(path: &str) -> String {
    let stripped = path.trim_start_matches('/').replace("../", "");
    let mut out = String::with_capacity(stripped.len());
    let mut prev_was_slash = false;
    for ch in stripped.chars() {
        if ch == '/' {
            if prev_was_slash {
                continue;
            }
            prev_was_slash = true;
        } else {
            prev_was_slash = false;
        }
        out.push(ch);
    }
    out
}

pub fn format_percent(value: f64) -> String {
    format!("{:.1}%", value * 100.0)
}

pub fn round3(value: f64) -> String {
    format!("{value:.3}")
}

// Debounce function to limit button events
pub fn debounce<F>(duration: i32, callback: F) -> Callback<MouseEvent>
where
    F: Fn() + Clone + 'static,
{
    let timeout = Rc::new(RefCell::new(None::<Timeout>));
    let timeout_clone = Rc::clone(&timeout);

    Callback::from(move |_| {
        let mut timeout_ref = timeout_clone.borrow_mut();

        if let Some(old_timeout) = timeout_ref.take() {
            old_timeout.cancel();
        }

        let inner_callback = callback.clone();
        let new_timeout = Timeout::new(duration as u32, move || {
            inner_callback();
        });

        *timeout_ref = Some(new_timeout);
    })
}

/// First image file of a selection; everything else is ignored.
pub fn first_image_file(file_list: &FileList) -> Option<GlooFile> {
    (0..file_list.length())
        .filter_map(|i| file_list.item(i))
        .find(|file| file.type_().starts_with("image/"))
        .map(GlooFile::from)
}

pub fn render_error_message(model: &Model) -> Html {
    if let Some(error_msg) = &model.error {
        html! {
            <div class="error-message">
                <i class="fa-solid fa-circle-exclamation"></i>
                <p>{ error_msg }</p>
            </div>
        }
    } else {
        html! {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_urls_pass_through() {
        assert_eq!(
            resolve_static_url("https://cdn.example.com/m.png", "http://localhost:8000"),
            "https://cdn.example.com/m.png"
        );
    }

    #[test]
    fn relative_paths_join_the_base_url() {
        assert_eq!(
            resolve_static_url("/static/masks/0.png", "http://localhost:8000/"),
            "http://localhost:8000/static/masks/0.png"
        );
    }

    #[test]
    fn empty_base_keeps_a_rooted_path_for_the_dev_proxy() {
        assert_eq!(resolve_static_url("masks/0.png", ""), "/masks/0.png");
    }

    #[test]
    fn parent_segments_and_repeated_separators_are_normalized() {
        assert_eq!(
            resolve_static_url("/static/../data//uploads///img.png", ""),
            "/static/data/uploads/img.png"
        );
    }

    #[test]
    fn empty_path_stays_empty() {
        assert_eq!(resolve_static_url("", "http://localhost:8000"), "");
    }

    #[test]
    fn display_helpers_format_scores() {
        assert_eq!(format_percent(0.8235), "82.3%");
        assert_eq!(round3(0.12345), "0.123");
    }
}
