//! Inert fingerprint surfaces
//!
//! Canvas and WebGL contexts, Web Audio, media playback checks and WebRTC.
//! Nothing here draws, plays or connects. The objects only have to look
//! right to feature detection. Methods that return promises in a browser
//! hand back a [`resolved`] thenable that settles on the task queue.

use std::rc::{Rc, Weak};

use super::timers::{Callback, TaskQueue};
use crate::disguise::native;
use crate::value::{arg, Completion, PlainObject, PropertyDescriptor, Value};

/// `UNMASKED_VENDOR_WEBGL` from `WEBGL_debug_renderer_info`
pub const UNMASKED_VENDOR: u32 = 37445;
/// `UNMASKED_RENDERER_WEBGL` from `WEBGL_debug_renderer_info`
pub const UNMASKED_RENDERER: u32 = 37446;
const GL_VENDOR: u32 = 7936;
const GL_RENDERER: u32 = 7937;
const GL_VERSION: u32 = 7938;

const GPU_VENDOR: &str = "Google Inc.";
const GPU_RENDERER: &str = "ANGLE (Intel, Intel(R) UHD Graphics 630, OpenGL 4.1)";

/// What `toDataURL` returns for every canvas
pub const BLANK_DATA_URL: &str = "data:image/png;base64,";

/// Default canvas size when the element has no `width`/`height` attribute
pub const CANVAS_WIDTH: u32 = 300;
pub const CANVAS_HEIGHT: u32 = 150;

/// Glyph advance used by `measureText`
const GLYPH_WIDTH: f64 = 6.0;

const SAMPLE_RATE: f64 = 44100.0;

/// Zero-filled buffers (`getImageData`, `getChannelData`) stop growing here
const MAX_BUFFER_LEN: usize = 1 << 20;

const CONTEXT_2D_NO_OPS: &[&str] = &[
    "save",
    "restore",
    "scale",
    "rotate",
    "translate",
    "transform",
    "setTransform",
    "resetTransform",
    "clearRect",
    "fillRect",
    "strokeRect",
    "beginPath",
    "closePath",
    "moveTo",
    "lineTo",
    "bezierCurveTo",
    "quadraticCurveTo",
    "arc",
    "arcTo",
    "ellipse",
    "rect",
    "fill",
    "stroke",
    "clip",
    "fillText",
    "strokeText",
    "drawImage",
    "putImageData",
    "setLineDash",
];

const WEBGL_NO_OPS: &[&str] = &[
    "bindBuffer",
    "bufferData",
    "shaderSource",
    "compileShader",
    "attachShader",
    "linkProgram",
    "useProgram",
    "enableVertexAttribArray",
    "vertexAttribPointer",
    "viewport",
    "clearColor",
    "clear",
    "drawArrays",
    "enable",
    "disable",
];

const AUDIO_PARAM_NO_OPS: &[&str] = &[
    "setValueAtTime",
    "linearRampToValueAtTime",
    "exponentialRampToValueAtTime",
    "setTargetAtTime",
    "setValueCurveAtTime",
    "cancelScheduledValues",
    "cancelAndHoldAtTime",
];

/// SDP body of every fabricated offer and answer
const BLANK_SDP: &str = "v=0\r\n";

fn boxed(object: PlainObject) -> Value {
    Value::from_host(Rc::new(object))
}

/// Attach a masked, non-enumerable method
fn method<F>(object: &PlainObject, name: &str, behavior: F)
where
    F: Fn(&Value, &[Value]) -> Completion + 'static,
{
    object.define(name, PropertyDescriptor::hidden(native(name, behavior)));
}

fn no_ops(object: &PlainObject, names: &[&str]) {
    for name in names {
        method(object, name, |_, _| Ok(Value::Undefined));
    }
}

fn zeros(class: &str, len: usize) -> Value {
    let len = len.min(MAX_BUFFER_LEN);
    boxed(PlainObject::array_like(class, vec![Value::from(0); len]))
}

/// Non-negative integer argument, `0` for junk
fn size_from(value: &Value) -> usize {
    let n = value.to_number();
    if n.is_finite() && n > 0.0 {
        n as usize
    } else {
        0
    }
}

/// An already-fulfilled promise stand-in.
///
/// `then` handlers run as a zero-delay task, never synchronously. Chained
/// promises carry `value` through when no handler is given and `undefined`
/// otherwise. Nothing here ever rejects, so `catch` handlers never run.
pub fn resolved(queue: &Weak<TaskQueue>, value: Value) -> Value {
    let promise = PlainObject::new("Promise");

    let (owner, settled) = (queue.clone(), value.clone());
    method(&promise, "then", move |_, args| {
        let handler = arg(args, 0);
        if !handler.is_callable() {
            return Ok(resolved(&owner, settled.clone()));
        }
        settle(&owner, handler, vec![settled.clone()]);
        Ok(resolved(&owner, Value::Undefined))
    });

    let (owner, settled) = (queue.clone(), value.clone());
    method(&promise, "catch", move |_, _| Ok(resolved(&owner, settled.clone())));

    let owner = queue.clone();
    method(&promise, "finally", move |_, args| {
        let handler = arg(args, 0);
        if handler.is_callable() {
            settle(&owner, handler, Vec::new());
        }
        Ok(resolved(&owner, value.clone()))
    });
    boxed(promise)
}

fn settle(queue: &Weak<TaskQueue>, handler: Value, args: Vec<Value>) {
    if let Some(queue) = queue.upgrade() {
        queue.schedule(Callback::script(handler, Value::Undefined, args), 0);
    }
}

/// Context for `canvas.getContext(kind)`, `None` for kinds a browser
/// would answer with `null`
pub fn canvas_context(kind: &str) -> Option<Value> {
    match kind {
        "2d" => Some(context_2d()),
        "webgl" | "experimental-webgl" => Some(webgl_context("WebGLRenderingContext")),
        "webgl2" => Some(webgl_context("WebGL2RenderingContext")),
        _ => None,
    }
}

fn context_2d() -> Value {
    let context = PlainObject::with_props(
        "CanvasRenderingContext2D",
        [
            ("fillStyle", Value::from("#000000")),
            ("strokeStyle", Value::from("#000000")),
            ("font", Value::from("10px sans-serif")),
            ("textAlign", Value::from("start")),
            ("textBaseline", Value::from("alphabetic")),
            ("globalAlpha", Value::from(1)),
            ("globalCompositeOperation", Value::from("source-over")),
            ("lineWidth", Value::from(1)),
        ],
    );
    no_ops(&context, CONTEXT_2D_NO_OPS);

    method(&context, "measureText", |_, args| {
        let width = arg(args, 0).to_js_string().chars().count() as f64 * GLYPH_WIDTH;
        Ok(boxed(PlainObject::with_props(
            "TextMetrics",
            [
                ("width", Value::from(width)),
                ("actualBoundingBoxAscent", Value::from(10)),
                ("actualBoundingBoxDescent", Value::from(2)),
                ("actualBoundingBoxLeft", Value::from(0)),
                ("actualBoundingBoxRight", Value::from(width)),
                ("fontBoundingBoxAscent", Value::from(10)),
                ("fontBoundingBoxDescent", Value::from(2)),
            ],
        )))
    });
    for name in ["getImageData", "createImageData"] {
        let dims = if name == "getImageData" { 2 } else { 0 };
        method(&context, name, move |_, args| {
            let width = size_from(&arg(args, dims));
            let height = size_from(&arg(args, dims + 1));
            Ok(image_data(width, height))
        });
    }
    for name in ["createLinearGradient", "createRadialGradient"] {
        method(&context, name, |_, _| {
            let gradient = PlainObject::new("CanvasGradient");
            no_ops(&gradient, &["addColorStop"]);
            Ok(boxed(gradient))
        });
    }
    method(&context, "createPattern", |_, _| {
        let pattern = PlainObject::new("CanvasPattern");
        no_ops(&pattern, &["setTransform"]);
        Ok(boxed(pattern))
    });
    for name in ["isPointInPath", "isPointInStroke"] {
        method(&context, name, |_, _| Ok(Value::Bool(false)));
    }
    method(&context, "getLineDash", |_, _| {
        Ok(boxed(PlainObject::array(Vec::new())))
    });
    boxed(context)
}

fn image_data(width: usize, height: usize) -> Value {
    boxed(PlainObject::with_props(
        "ImageData",
        [
            ("width", Value::from(width)),
            ("height", Value::from(height)),
            (
                "data",
                zeros("Uint8ClampedArray", width.saturating_mul(height).saturating_mul(4)),
            ),
        ],
    ))
}

fn webgl_context(class: &str) -> Value {
    let context = PlainObject::with_props(
        class,
        [
            ("drawingBufferWidth", Value::from(CANVAS_WIDTH)),
            ("drawingBufferHeight", Value::from(CANVAS_HEIGHT)),
        ],
    );
    no_ops(&context, WEBGL_NO_OPS);

    method(&context, "getParameter", |_, args| {
        let pname = arg(args, 0).to_number();
        Ok(match pname as u32 {
            _ if pname.fract() != 0.0 || pname < 0.0 => Value::Null,
            UNMASKED_VENDOR => Value::from(GPU_VENDOR),
            UNMASKED_RENDERER => Value::from(GPU_RENDERER),
            GL_VENDOR => Value::from("WebKit"),
            GL_RENDERER => Value::from("WebKit WebGL"),
            GL_VERSION => Value::from("WebGL 1.0 (OpenGL ES 2.0 Chromium)"),
            _ => Value::from(0),
        })
    });
    method(&context, "getExtension", |_, _| Ok(Value::Null));
    method(&context, "getSupportedExtensions", |_, _| {
        Ok(boxed(PlainObject::array(Vec::new())))
    });
    method(&context, "getContextAttributes", |_, _| {
        Ok(boxed(PlainObject::with_props(
            "Object",
            [
                ("alpha", Value::Bool(true)),
                ("antialias", Value::Bool(true)),
                ("depth", Value::Bool(true)),
            ],
        )))
    });
    method(&context, "getShaderPrecisionFormat", |_, _| {
        Ok(boxed(PlainObject::with_props(
            "WebGLShaderPrecisionFormat",
            [
                ("rangeMin", Value::from(127)),
                ("rangeMax", Value::from(127)),
                ("precision", Value::from(23)),
            ],
        )))
    });
    for (name, class) in [
        ("createBuffer", "WebGLBuffer"),
        ("createProgram", "WebGLProgram"),
        ("createShader", "WebGLShader"),
        ("createTexture", "WebGLTexture"),
    ] {
        method(&context, name, move |_, _| Ok(boxed(PlainObject::new(class))));
    }
    boxed(context)
}

/// Answer for `HTMLMediaElement.canPlayType`
pub fn can_play_type(mime: &str) -> &'static str {
    if mime.contains("mp4") || mime.contains("mp3") {
        "probably"
    } else {
        ""
    }
}

fn audio_param(value: f64) -> Value {
    let param = PlainObject::with_props(
        "AudioParam",
        [
            ("value", Value::from(value)),
            ("defaultValue", Value::from(value)),
        ],
    );
    no_ops(&param, AUDIO_PARAM_NO_OPS);
    boxed(param)
}

fn audio_node<const N: usize>(class: &str, props: [(&str, Value); N]) -> PlainObject {
    let node = PlainObject::with_props(
        class,
        [
            ("channelCount", Value::from(2)),
            ("channelCountMode", Value::from("max")),
            ("channelInterpretation", Value::from("speakers")),
        ],
    );
    for (key, value) in props {
        node.insert(key, value);
    }
    no_ops(&node, &["connect", "disconnect"]);
    node
}

fn audio_buffer(channels: usize, length: usize, sample_rate: f64) -> Value {
    let buffer = PlainObject::with_props(
        "AudioBuffer",
        [
            ("numberOfChannels", Value::from(channels.max(1))),
            ("length", Value::from(length)),
            ("sampleRate", Value::from(sample_rate)),
            ("duration", Value::from(length as f64 / sample_rate)),
        ],
    );
    method(&buffer, "getChannelData", move |_, _| Ok(zeros("Float32Array", length)));
    no_ops(&buffer, &["copyFromChannel", "copyToChannel"]);
    boxed(buffer)
}

fn listener() -> Value {
    let listener = PlainObject::new("AudioListener");
    for (key, value) in [
        ("positionX", 0.0),
        ("positionY", 0.0),
        ("positionZ", 0.0),
        ("forwardX", 0.0),
        ("forwardY", 0.0),
        ("forwardZ", -1.0),
        ("upX", 0.0),
        ("upY", 1.0),
        ("upZ", 0.0),
    ] {
        listener.insert(key, audio_param(value));
    }
    boxed(listener)
}

/// Shared body of the live and offline audio contexts
fn base_audio_context(class: &str, sample_rate: f64, queue: &Weak<TaskQueue>) -> Rc<PlainObject> {
    let context = Rc::new(PlainObject::with_props(
        class,
        [
            (
                "destination",
                boxed(audio_node("AudioDestinationNode", [("maxChannelCount", Value::from(2))])),
            ),
            ("sampleRate", Value::from(sample_rate)),
            ("currentTime", Value::from(0)),
            ("state", Value::from("running")),
            ("listener", listener()),
            ("onstatechange", Value::Null),
        ],
    ));

    method(&context, "createOscillator", |_, _| {
        let oscillator = audio_node(
            "OscillatorNode",
            [
                ("frequency", audio_param(440.0)),
                ("detune", audio_param(0.0)),
                ("type", Value::from("sine")),
                ("onended", Value::Null),
            ],
        );
        no_ops(&oscillator, &["start", "stop", "setPeriodicWave"]);
        Ok(boxed(oscillator))
    });
    method(&context, "createGain", |_, _| {
        Ok(boxed(audio_node("GainNode", [("gain", audio_param(1.0))])))
    });
    method(&context, "createDynamicsCompressor", |_, _| {
        Ok(boxed(audio_node(
            "DynamicsCompressorNode",
            [
                ("threshold", audio_param(-24.0)),
                ("knee", audio_param(30.0)),
                ("ratio", audio_param(12.0)),
                ("reduction", Value::from(0)),
                ("attack", audio_param(0.003)),
                ("release", audio_param(0.25)),
            ],
        )))
    });
    method(&context, "createBuffer", |_, args| {
        let rate = arg(args, 2).to_number();
        let rate = if rate.is_finite() && rate > 0.0 { rate } else { SAMPLE_RATE };
        Ok(audio_buffer(size_from(&arg(args, 0)), size_from(&arg(args, 1)), rate))
    });
    method(&context, "createBufferSource", |_, _| {
        let source = audio_node(
            "AudioBufferSourceNode",
            [
                ("buffer", Value::Null),
                ("playbackRate", audio_param(1.0)),
                ("loop", Value::Bool(false)),
                ("onended", Value::Null),
            ],
        );
        no_ops(&source, &["start", "stop"]);
        Ok(boxed(source))
    });
    method(&context, "createAnalyser", |_, _| {
        let analyser = audio_node(
            "AnalyserNode",
            [
                ("fftSize", Value::from(2048)),
                ("frequencyBinCount", Value::from(1024)),
            ],
        );
        no_ops(
            &analyser,
            &["getFloatFrequencyData", "getByteFrequencyData", "getFloatTimeDomainData"],
        );
        Ok(boxed(analyser))
    });
    method(&context, "createScriptProcessor", |_, _| {
        Ok(boxed(audio_node(
            "ScriptProcessorNode",
            [("onaudioprocess", Value::Null)],
        )))
    });

    let owner = queue.clone();
    method(&context, "decodeAudioData", move |_, _| {
        Ok(resolved(&owner, audio_buffer(1, 100, SAMPLE_RATE)))
    });
    for (name, state) in [("suspend", "suspended"), ("resume", "running"), ("close", "closed")] {
        let (owner, queue) = (Rc::downgrade(&context), queue.clone());
        method(&context, name, move |_, _| {
            if let Some(context) = owner.upgrade() {
                context.insert("state", Value::from(state));
            }
            Ok(resolved(&queue, Value::Undefined))
        });
    }
    context
}

/// `new AudioContext()`
pub fn audio_context(queue: &Weak<TaskQueue>) -> Value {
    Value::from_host(base_audio_context("AudioContext", SAMPLE_RATE, queue))
}

/// `new OfflineAudioContext(channels, length, sampleRate)`, also accepting
/// the single options-object form
pub fn offline_audio_context(queue: &Weak<TaskQueue>, args: &[Value]) -> Value {
    let first = arg(args, 0);
    let (channels, length, rate) = if first.is_object() {
        (
            first.get_or_undefined("numberOfChannels"),
            first.get_or_undefined("length"),
            first.get_or_undefined("sampleRate"),
        )
    } else {
        (first, arg(args, 1), arg(args, 2))
    };
    let channels = size_from(&channels).max(1);
    let length = size_from(&length);
    let rate = rate.to_number();
    let rate = if rate.is_finite() && rate > 0.0 { rate } else { SAMPLE_RATE };

    let context = base_audio_context("OfflineAudioContext", rate, queue);
    context.insert("length", Value::from(length));
    let owner = queue.clone();
    method(&context, "startRendering", move |_, _| {
        Ok(resolved(&owner, audio_buffer(channels, length, rate)))
    });
    Value::from_host(context)
}

/// `new RTCSessionDescription({type, sdp})`
pub fn session_description(init: &Value) -> Value {
    let field = |key| match init.get_or_undefined(key) {
        v if v.is_undefined() => Value::from(""),
        v => Value::from(v.to_js_string()),
    };
    let description = PlainObject::with_props(
        "RTCSessionDescription",
        [("type", field("type")), ("sdp", field("sdp"))],
    );
    boxed(description)
}

/// `new RTCIceCandidate({candidate, sdpMid, sdpMLineIndex})`
pub fn ice_candidate(init: &Value) -> Value {
    let candidate = init.get_or_undefined("candidate");
    let mid = init.get_or_undefined("sdpMid");
    let index = init.get_or_undefined("sdpMLineIndex").to_number();
    boxed(PlainObject::with_props(
        "RTCIceCandidate",
        [
            (
                "candidate",
                Value::from(if candidate.is_nullish() { String::new() } else { candidate.to_js_string() }),
            ),
            (
                "sdpMid",
                Value::from(if mid.is_nullish() { String::new() } else { mid.to_js_string() }),
            ),
            ("sdpMLineIndex", Value::from(if index.is_finite() { index } else { 0.0 })),
        ],
    ))
}

/// `new RTCPeerConnection(config)`. Never gathers candidates or connects.
pub fn peer_connection(queue: &Weak<TaskQueue>) -> Value {
    let connection = Rc::new(PlainObject::with_props(
        "RTCPeerConnection",
        [
            ("localDescription", Value::Null),
            ("remoteDescription", Value::Null),
            ("iceConnectionState", Value::from("new")),
            ("iceGatheringState", Value::from("new")),
            ("connectionState", Value::from("new")),
            ("signalingState", Value::from("stable")),
            ("onicecandidate", Value::Null),
            ("oniceconnectionstatechange", Value::Null),
            ("ondatachannel", Value::Null),
        ],
    ));

    method(&connection, "createDataChannel", |_, args| {
        let channel = PlainObject::with_props(
            "RTCDataChannel",
            [
                ("label", Value::from(arg(args, 0).to_js_string())),
                ("readyState", Value::from("open")),
                ("onmessage", Value::Null),
                ("onopen", Value::Null),
                ("onclose", Value::Null),
            ],
        );
        no_ops(&channel, &["send", "close"]);
        Ok(boxed(channel))
    });
    for (name, kind) in [("createOffer", "offer"), ("createAnswer", "answer")] {
        let owner = queue.clone();
        method(&connection, name, move |_, _| {
            let init = boxed(PlainObject::with_props(
                "Object",
                [("type", Value::from(kind)), ("sdp", Value::from(BLANK_SDP))],
            ));
            Ok(resolved(&owner, session_description(&init)))
        });
    }
    for (name, slot) in [
        ("setLocalDescription", "localDescription"),
        ("setRemoteDescription", "remoteDescription"),
    ] {
        let (this, owner) = (Rc::downgrade(&connection), queue.clone());
        method(&connection, name, move |_, args| {
            if let Some(connection) = this.upgrade() {
                connection.insert(slot, arg(args, 0));
            }
            Ok(resolved(&owner, Value::Undefined))
        });
    }
    let owner = queue.clone();
    method(&connection, "addIceCandidate", move |_, _| Ok(resolved(&owner, Value::Undefined)));
    let owner = queue.clone();
    method(&connection, "getStats", move |_, _| {
        Ok(resolved(&owner, boxed(PlainObject::new("RTCStatsReport"))))
    });
    let this = Rc::downgrade(&connection);
    method(&connection, "close", move |_, _| {
        if let Some(connection) = this.upgrade() {
            connection.insert("signalingState", Value::from("closed"));
            connection.insert("iceConnectionState", Value::from("closed"));
            connection.insert("connectionState", Value::from("closed"));
        }
        Ok(Value::Undefined)
    });
    Value::from_host(connection)
}
