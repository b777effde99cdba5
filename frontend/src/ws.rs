use std::cell::RefCell;

use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{CloseEvent, MessageEvent, WebSocket};

use crate::api::ws_url;
use crate::models::{WsEvent, WsRequest};

thread_local! {
    // One session socket per page.
    static SOCKET: RefCell<Option<WebSocket>> = const { RefCell::new(None) };
}

/// Opens the session socket and wires the callbacks. The server owns the
/// conversation; every `WsEvent` it pushes is handed to `on_event`.
pub fn connect(
    on_open: impl Fn() + 'static,
    on_event: impl Fn(WsEvent) + 'static,
    on_close: impl Fn(String) + 'static,
) -> Result<(), String> {
    let ws = WebSocket::new(&ws_url()).map_err(|e| format!("Failed to connect: {e:?}"))?;

    // --- onopen ---
    let onopen = Closure::<dyn Fn()>::new(on_open);
    ws.set_onopen(Some(onopen.as_ref().unchecked_ref()));
    onopen.forget();

    // --- onmessage: dispatch WsEvent ---
    let onmessage = Closure::<dyn Fn(MessageEvent)>::new(move |ev: MessageEvent| {
        if let Some(text) = ev.data().as_string() {
            match serde_json::from_str::<WsEvent>(&text) {
                Ok(event) => on_event(event),
                Err(e) => log::error!("Unparseable server event: {e}"),
            }
        }
    });
    ws.set_onmessage(Some(onmessage.as_ref().unchecked_ref()));
    onmessage.forget();

    // --- onerror: the close event that follows carries the details ---
    let onerror = Closure::<dyn Fn()>::new(move || {
        log::error!("WebSocket connection error");
    });
    ws.set_onerror(Some(onerror.as_ref().unchecked_ref()));
    onerror.forget();

    // --- onclose ---
    let onclose = Closure::<dyn Fn(CloseEvent)>::new(move |ev: CloseEvent| {
        SOCKET.with(|s| s.borrow_mut().take());
        on_close(ev.reason());
    });
    ws.set_onclose(Some(onclose.as_ref().unchecked_ref()));
    onclose.forget();

    SOCKET.with(|s| *s.borrow_mut() = Some(ws));
    Ok(())
}

/// Sends a request over the open session socket.
pub fn send(request: &WsRequest) -> Result<(), String> {
    let json = serde_json::to_string(request).map_err(|e| format!("Serialize error: {e}"))?;
    SOCKET.with(|s| match s.borrow().as_ref() {
        Some(ws) if ws.ready_state() == WebSocket::OPEN => ws
            .send_with_str(&json)
            .map_err(|e| format!("Send failed: {e:?}")),
        _ => Err("Not connected".to_string()),
    })
}

/// Close the session socket; the server cancels anything still in flight.
pub fn close() {
    let ws = SOCKET.with(|s| s.borrow_mut().take());
    if let Some(ws) = ws {
        let _ = ws.close();
    }
}
