use leptos::ev;
use leptos::html::Div;
use leptos::prelude::*;

use crate::models::{Message, Sender};
use crate::state::AppState;

/// The chat widget: header, message log, controls and composer.
#[component]
pub fn ChatArea() -> impl IntoView {
    let state = expect_context::<AppState>();
    let log_ref = NodeRef::<Div>::new();

    // Keep the newest message in view.
    Effect::new(move |_| {
        state.messages.track();
        if let Some(el) = log_ref.get() {
            el.set_scroll_top(el.scroll_height());
        }
    });

    view! {
        <main class="chat-area">
            // Chat header
            <div class="chat-header">
                <span>
                    {move || match state.model.get() {
                        Some(model) => format!("Chatting with {model}"),
                        None => "Chat".to_string(),
                    }}
                </span>
                <span class="connection" class:online=move || state.connected.get()>
                    {move || if state.connected.get() { "connected" } else { "offline" }}
                </span>
            </div>

            // Error banner
            {move || {
                state.error.get().map(|err| {
                    view! {
                        <div class="error-banner">{err}</div>
                    }
                })
            }}

            // Messages
            <div class="messages-container" node_ref=log_ref>
                {move || {
                    if state.messages.with(|msgs| msgs.is_empty()) {
                        view! {
                            <div class="empty-state">
                                "Send a message to start chatting"
                            </div>
                        }.into_any()
                    } else {
                        view! {
                            <For
                                each=move || state.messages.get()
                                key=|m| m.id.clone()
                                let:msg
                            >
                                <MessageBubble message=msg />
                            </For>
                        }.into_any()
                    }
                }}
                {move || state.pending.get().then(|| view! {
                    <div class="message bot typing">"AI is thinking…"</div>
                })}
            </div>

            <ChatControls />
            <ChatInput />
        </main>
    }
}

/// A single chat message bubble. The server already rendered `html`:
/// markdown for the bot, escaped line-broken text for the user.
#[component]
fn MessageBubble(message: Message) -> impl IntoView {
    let (css_class, avatar) = match message.sender {
        Sender::User => ("message user", "You"),
        Sender::Bot => ("message bot", "AI"),
    };

    view! {
        <div class=css_class>
            <div class="avatar">{avatar}</div>
            <div class="bubble" inner_html=message.html />
        </div>
    }
}

/// Regenerate / cancel buttons.
#[component]
fn ChatControls() -> impl IntoView {
    let state = expect_context::<AppState>();

    view! {
        <div class="chat-controls">
            <button
                class="regenerate-btn"
                on:click=move |_| state.regenerate()
                disabled=move || !state.can_regenerate()
            >
                "↻ Regenerate"
            </button>
            <Show when=move || state.pending.get()>
                <button class="cancel-btn" on:click=move |_| state.cancel()>
                    "Stop"
                </button>
            </Show>
        </div>
    }
}

/// Chat input form with textarea and send button.
#[component]
fn ChatInput() -> impl IntoView {
    let state = expect_context::<AppState>();
    let (input, set_input) = signal(String::new());

    let is_sending = move || state.pending.get();

    let send = move || {
        let text = input.get_untracked();
        if state.submit(text) {
            set_input.set(String::new());
        }
    };

    let on_keydown = move |ev: ev::KeyboardEvent| {
        if ev.key() == "Enter" && !ev.shift_key() {
            ev.prevent_default();
            send();
        }
    };

    let on_submit = move |_| {
        send();
    };

    view! {
        <div class="input-area">
            <div class="input-row">
                <textarea
                    rows="1"
                    placeholder="Type your message… (Enter to send, Shift+Enter for newline)"
                    prop:value=input
                    on:input=move |ev| {
                        set_input.set(event_target_value(&ev));
                    }
                    on:keydown=on_keydown
                    disabled=is_sending
                />
                <button
                    class="send-btn"
                    on:click=on_submit
                    disabled=move || is_sending() || input.get().trim().is_empty()
                >
                    {move || if is_sending() { "Sending…" } else { "Send" }}
                </button>
            </div>
        </div>
    }
}
