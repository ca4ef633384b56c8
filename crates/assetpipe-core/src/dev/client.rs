//! Browser side of the dev server: live reload and the error overlay.

use crate::bundler::html::insert_before;

/// URL the client script is served from.
pub const CLIENT_PATH: &str = "/__assetpipe/client.js";
/// WebSocket endpoint.
pub const SOCKET_PATH: &str = "/__assetpipe/ws";
/// JSON status endpoint.
pub const STATUS_PATH: &str = "/__assetpipe/status";

const CLIENT_TEMPLATE: &str = r##"(function () {
  var OVERLAY_ERRORS = __OVERLAY_ERRORS__;
  var OVERLAY_WARNINGS = __OVERLAY_WARNINGS__;
  var OVERLAY_ID = "__assetpipe_overlay__";
  var retries = 0;

  function escape(text) {
    return String(text).replace(/&/g, "&amp;").replace(/</g, "&lt;").replace(/>/g, "&gt;");
  }

  function hideOverlay() {
    var el = document.getElementById(OVERLAY_ID);
    if (el) el.parentNode.removeChild(el);
  }

  function showOverlay(title, detail, color) {
    hideOverlay();
    var el = document.createElement("div");
    el.id = OVERLAY_ID;
    el.style.cssText = "position:fixed;inset:0;z-index:2147483647;background:rgba(0,0,0,.85);color:#e8e8e8;font:13px/1.5 Menlo,Consolas,monospace;padding:32px;overflow:auto;white-space:pre-wrap";
    el.innerHTML = "<div style=\"color:" + color + ";font-size:16px;margin-bottom:12px\">" + escape(title) + "</div>" + escape(detail);
    el.addEventListener("click", hideOverlay);
    document.body.appendChild(el);
  }

  function connect() {
    var proto = location.protocol === "https:" ? "wss://" : "ws://";
    var socket = new WebSocket(proto + location.host + "__SOCKET_PATH__");
    socket.onopen = function () { retries = 0; };
    socket.onmessage = function (event) {
      var msg;
      try { msg = JSON.parse(event.data); } catch (e) { return; }
      switch (msg.type) {
        case "building":
          console.log("[assetpipe] rebuilding...");
          break;
        case "ok":
          hideOverlay();
          break;
        case "reload":
          location.reload();
          break;
        case "error":
          console.error("[assetpipe] " + msg.code + ": " + msg.message);
          if (OVERLAY_ERRORS) {
            showOverlay(msg.code, msg.message + (msg.path ? "\n\n" + msg.path : ""), "#ff6b6b");
          }
          break;
        case "warning":
          console.warn("[assetpipe] " + msg.message);
          if (OVERLAY_WARNINGS) showOverlay("Warning", msg.message, "#ffd166");
          break;
      }
    };
    socket.onclose = function () {
      var delay = Math.min(1000 * Math.pow(2, retries++), 10000);
      setTimeout(connect, delay);
    };
  }

  connect();
})();
"##;

/// The client script for the given overlay settings.
#[must_use]
pub fn client_script(overlay_errors: bool, overlay_warnings: bool) -> String {
    CLIENT_TEMPLATE
        .replace("__OVERLAY_ERRORS__", bool_js(overlay_errors))
        .replace("__OVERLAY_WARNINGS__", bool_js(overlay_warnings))
        .replace("__SOCKET_PATH__", SOCKET_PATH)
}

fn bool_js(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

/// Add the client `<script>` to an HTML document, once.
#[must_use]
pub fn inject_client(html: &str) -> String {
    if html.contains(CLIENT_PATH) {
        return html.to_string();
    }
    let mut html = html.to_string();
    let tag = format!("<script src=\"{CLIENT_PATH}\"></script>");
    if html.to_ascii_lowercase().contains("</head>") {
        insert_before(&mut html, "</head>", &tag);
    } else {
        insert_before(&mut html, "</body>", &tag);
    }
    html
}
