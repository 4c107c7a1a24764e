//! Editor surface: hosts the plugin's view in an embeddable native window.
//!
//! A dedicated GUI thread owns the window and pumps its messages; the
//! plugin's window procedure and parameter-edit callbacks run there while
//! the dispatch thread keeps serving the protocol. The two threads share
//! nothing but the edit ring and the cached window size.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use vst3::ComPtr;
use vst3::Steinberg::Vst::IEditController;

use vstbridge_protocol::{RespEditorInfo, RespEditorSize};

use crate::error::{HostError, Result};

/// Current view size, written by the GUI thread (`WM_SIZE`, `resizeView`)
/// and read by the dispatch thread for `GetEditorSize`.
struct EditorShared {
    width: AtomicU32,
    height: AtomicU32,
}

/// An open editor window. Dropping it closes the window and joins the GUI
/// thread.
pub struct EditorSurface {
    window_id: u32,
    shared: Arc<EditorShared>,
    #[cfg(windows)]
    hwnd: isize,
    #[cfg(windows)]
    thread: Option<std::thread::JoinHandle<()>>,
}

impl EditorSurface {
    pub fn info(&self) -> RespEditorInfo {
        RespEditorInfo {
            window_id: self.window_id,
            width: self.shared.width.load(Ordering::Relaxed),
            height: self.shared.height.load(Ordering::Relaxed),
        }
    }

    pub fn size(&self) -> RespEditorSize {
        RespEditorSize {
            width: self.shared.width.load(Ordering::Relaxed),
            height: self.shared.height.load(Ordering::Relaxed),
        }
    }
}

#[cfg(windows)]
impl EditorSurface {
    /// Creates the view, attaches it to a fresh native window on the GUI
    /// thread, and returns once the window is shown.
    pub fn open(controller: ComPtr<IEditController>, title: &str) -> Result<Self> {
        win32::open(controller, title)
    }
}

#[cfg(not(windows))]
impl EditorSurface {
    pub fn open(_controller: ComPtr<IEditController>, _title: &str) -> Result<Self> {
        Err(HostError::Editor(
            "editor surface is only available on the Windows host".into(),
        ))
    }
}

impl Drop for EditorSurface {
    fn drop(&mut self) {
        #[cfg(windows)]
        {
            use windows_sys::Win32::UI::WindowsAndMessaging::{PostMessageW, WM_CLOSE};
            // Harmless if the user already closed the window.
            unsafe {
                PostMessageW(self.hwnd as _, WM_CLOSE, 0, 0);
            }
            if let Some(thread) = self.thread.take() {
                let _ = thread.join();
            }
        }
    }
}

#[cfg(windows)]
mod win32 {
    use super::*;

    use std::ffi::{c_char, c_void};
    use std::ptr::{null, null_mut};
    use std::sync::mpsc;
    use std::sync::Once;

    use tracing::{debug, warn};

    use vst3::Steinberg::Vst::IEditControllerTrait as _;
    use vst3::Steinberg::{
        kInvalidArgument, kResultOk, tresult, IPlugFrame, IPlugFrameTrait, IPlugView,
        IPlugViewTrait as _, ViewRect,
    };
    use vst3::{Class, ComWrapper};

    use windows_sys::Win32::Foundation::{HWND, LPARAM, LRESULT, RECT, WPARAM};
    use windows_sys::Win32::Graphics::Gdi::UpdateWindow;
    use windows_sys::Win32::System::LibraryLoader::GetModuleHandleW;
    use windows_sys::Win32::UI::WindowsAndMessaging::{
        AdjustWindowRectEx, CreateWindowExW, DefWindowProcW, DestroyWindow, DispatchMessageW,
        GetMessageW, GetWindowLongPtrW, LoadCursorW, PostQuitMessage, RegisterClassExW,
        SetWindowLongPtrW, SetWindowPos, ShowWindow, TranslateMessage, CREATESTRUCTW,
        CS_HREDRAW, CS_VREDRAW, CW_USEDEFAULT, GWLP_USERDATA, GWL_EXSTYLE, GWL_STYLE,
        IDC_ARROW, MSG, SWP_NOMOVE, SWP_NOZORDER, SW_SHOW, WM_CLOSE, WM_CREATE, WM_DESTROY,
        WM_SIZE, WNDCLASSEXW, WS_OVERLAPPEDWINDOW,
    };

    const WINDOW_CLASS_NAME: &str = "VstBridgePluginWindow";
    const EDITOR_VIEW_NAME: &[u8] = b"editor\0";
    const PLATFORM_TYPE_HWND: &[u8] = b"HWND\0";

    const DEFAULT_WIDTH: u32 = 800;
    const DEFAULT_HEIGHT: u32 = 600;
    const MIN_EDGE: u32 = 100;

    static REGISTER_WINDOW_CLASS: Once = Once::new();

    fn wide(s: &str) -> Vec<u16> {
        s.encode_utf16().chain([0]).collect()
    }

    /// State owned by the window, reachable from the window procedure.
    struct WindowState {
        view: ComPtr<IPlugView>,
        shared: Arc<EditorShared>,
    }

    /// Host-side frame the view calls to request a resize. Resizes the
    /// native window to fit and forwards `onSize` back to the view.
    struct PlugFrame {
        hwnd: isize,
        shared: Arc<EditorShared>,
    }

    impl Class for PlugFrame {
        type Interfaces = (IPlugFrame,);
    }

    impl IPlugFrameTrait for PlugFrame {
        unsafe fn resizeView(&self, view: *mut IPlugView, new_size: *mut ViewRect) -> tresult {
            if view.is_null() || new_size.is_null() {
                return kInvalidArgument;
            }
            let width = (*new_size).right - (*new_size).left;
            let height = (*new_size).bottom - (*new_size).top;
            if width <= 0 || height <= 0 {
                return kInvalidArgument;
            }

            let hwnd = self.hwnd as HWND;
            let style = GetWindowLongPtrW(hwnd, GWL_STYLE) as u32;
            let ex_style = GetWindowLongPtrW(hwnd, GWL_EXSTYLE) as u32;
            let mut rect = RECT {
                left: 0,
                top: 0,
                right: width,
                bottom: height,
            };
            AdjustWindowRectEx(&mut rect, style, 0, ex_style);
            SetWindowPos(
                hwnd,
                null_mut(),
                0,
                0,
                rect.right - rect.left,
                rect.bottom - rect.top,
                SWP_NOMOVE | SWP_NOZORDER,
            );

            self.shared.width.store(width as u32, Ordering::Relaxed);
            self.shared.height.store(height as u32, Ordering::Relaxed);

            // The view pointer is borrowed from the caller; wrap it without
            // taking over its reference.
            let view = ComPtr::from_raw(view);
            let result = match &view {
                Some(view) => view.onSize(new_size),
                None => kInvalidArgument,
            };
            if let Some(view) = view {
                std::mem::forget(view);
            }
            result
        }
    }

    /// The controller pointer crosses onto the GUI thread once, before any
    /// window exists; all view work happens on that thread afterwards.
    struct SendController(ComPtr<IEditController>);
    // SAFETY: the wrapped reference is moved, never shared; the dispatch
    // thread keeps its own counted reference and performs no view calls.
    unsafe impl Send for SendController {}

    type OpenReply = std::result::Result<(isize, u32, u32), HostError>;

    pub(super) fn open(controller: ComPtr<IEditController>, title: &str) -> Result<EditorSurface> {
        let shared = Arc::new(EditorShared {
            width: AtomicU32::new(0),
            height: AtomicU32::new(0),
        });

        let (reply_tx, reply_rx) = mpsc::channel::<OpenReply>();
        let thread_shared = Arc::clone(&shared);
        let moved = SendController(controller);
        let title = title.to_string();

        let thread = std::thread::Builder::new()
            .name("editor-gui".into())
            .spawn(move || gui_thread_main(moved, title, thread_shared, reply_tx))
            .map_err(|e| HostError::Editor(format!("failed to spawn GUI thread: {e}")))?;

        match reply_rx.recv() {
            Ok(Ok((hwnd, width, height))) => {
                debug!(hwnd, width, height, "editor window open");
                Ok(EditorSurface {
                    window_id: hwnd as u32,
                    shared,
                    hwnd,
                    thread: Some(thread),
                })
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(HostError::Editor("GUI thread exited before reporting".into()))
            }
        }
    }

    fn gui_thread_main(
        controller: SendController,
        title: String,
        shared: Arc<EditorShared>,
        reply: mpsc::Sender<OpenReply>,
    ) {
        let fail = |reply: &mpsc::Sender<OpenReply>, message: &str| {
            let _ = reply.send(Err(HostError::Editor(message.into())));
        };

        let view_ptr =
            unsafe { controller.0.createView(EDITOR_VIEW_NAME.as_ptr() as *const c_char) };
        let Some(view) = (unsafe { ComPtr::from_raw(view_ptr) }) else {
            fail(&reply, "plugin has no editor view");
            return;
        };

        if unsafe { view.isPlatformTypeSupported(PLATFORM_TYPE_HWND.as_ptr() as *const c_char) }
            != kResultOk
        {
            fail(&reply, "view does not support HWND embedding");
            return;
        }

        let mut rect = ViewRect {
            left: 0,
            top: 0,
            right: 0,
            bottom: 0,
        };
        let (mut width, mut height) = if unsafe { view.getSize(&mut rect) } == kResultOk
            && rect.right > rect.left
            && rect.bottom > rect.top
        {
            ((rect.right - rect.left) as u32, (rect.bottom - rect.top) as u32)
        } else {
            (DEFAULT_WIDTH, DEFAULT_HEIGHT)
        };
        width = width.max(MIN_EDGE);
        height = height.max(MIN_EDGE);

        let class_name = wide(WINDOW_CLASS_NAME);
        REGISTER_WINDOW_CLASS.call_once(|| unsafe {
            let wc = WNDCLASSEXW {
                cbSize: std::mem::size_of::<WNDCLASSEXW>() as u32,
                style: CS_HREDRAW | CS_VREDRAW,
                lpfnWndProc: Some(plugin_window_proc),
                cbClsExtra: 0,
                cbWndExtra: 0,
                hInstance: GetModuleHandleW(null()),
                hIcon: null_mut(),
                hCursor: LoadCursorW(null_mut(), IDC_ARROW),
                hbrBackground: null_mut(),
                lpszMenuName: null(),
                lpszClassName: class_name.as_ptr(),
                hIconSm: null_mut(),
            };
            if RegisterClassExW(&wc) == 0 {
                warn!("window class registration failed");
            }
        });

        let style = WS_OVERLAPPEDWINDOW;
        let mut frame_rect = RECT {
            left: 0,
            top: 0,
            right: width as i32,
            bottom: height as i32,
        };
        unsafe { AdjustWindowRectEx(&mut frame_rect, style, 0, 0) };

        let state_ptr = Box::into_raw(Box::new(WindowState {
            view: view.clone(),
            shared: Arc::clone(&shared),
        }));
        let title_wide = wide(&title);
        let hwnd = unsafe {
            CreateWindowExW(
                0,
                class_name.as_ptr(),
                title_wide.as_ptr(),
                style,
                CW_USEDEFAULT,
                CW_USEDEFAULT,
                frame_rect.right - frame_rect.left,
                frame_rect.bottom - frame_rect.top,
                null_mut(),
                null_mut(),
                GetModuleHandleW(null()),
                state_ptr as *const c_void,
            )
        };
        if hwnd.is_null() {
            // Window procedure never ran; reclaim the state ourselves.
            drop(unsafe { Box::from_raw(state_ptr) });
            fail(&reply, "native window creation failed");
            return;
        }

        let frame = ComWrapper::new(PlugFrame {
            hwnd: hwnd as isize,
            shared: Arc::clone(&shared),
        });
        if let Some(frame_ptr) = frame.to_com_ptr::<IPlugFrame>() {
            unsafe {
                view.setFrame(frame_ptr.as_ptr());
            }
        }

        if unsafe { view.attached(hwnd as *mut c_void, PLATFORM_TYPE_HWND.as_ptr() as *const c_char) }
            != kResultOk
        {
            unsafe {
                view.setFrame(null_mut());
                DestroyWindow(hwnd);
            }
            fail(&reply, "view refused to attach to the window");
            return;
        }

        shared.width.store(width, Ordering::Relaxed);
        shared.height.store(height, Ordering::Relaxed);
        unsafe {
            ShowWindow(hwnd, SW_SHOW);
            UpdateWindow(hwnd);
        }

        if reply.send(Ok((hwnd as isize, width, height))).is_err() {
            // Opener vanished; tear the window down again.
            unsafe {
                DestroyWindow(hwnd);
            }
            return;
        }

        let mut msg: MSG = unsafe { std::mem::zeroed() };
        while unsafe { GetMessageW(&mut msg, null_mut(), 0, 0) } > 0 {
            unsafe {
                TranslateMessage(&msg);
                DispatchMessageW(&msg);
            }
        }
        debug!("editor GUI thread exiting");
        // `view` drops here, releasing the GUI thread's reference.
    }

    fn window_state<'a>(hwnd: HWND) -> Option<&'a WindowState> {
        let ptr = unsafe { GetWindowLongPtrW(hwnd, GWLP_USERDATA) } as *mut WindowState;
        if ptr.is_null() {
            None
        } else {
            Some(unsafe { &*ptr })
        }
    }

    unsafe extern "system" fn plugin_window_proc(
        hwnd: HWND,
        msg: u32,
        wparam: WPARAM,
        lparam: LPARAM,
    ) -> LRESULT {
        match msg {
            WM_CREATE => {
                let cs = lparam as *const CREATESTRUCTW;
                SetWindowLongPtrW(hwnd, GWLP_USERDATA, (*cs).lpCreateParams as isize);
                0
            }
            WM_SIZE => {
                if let Some(state) = window_state(hwnd) {
                    let width = (lparam & 0xFFFF) as u32;
                    let height = ((lparam >> 16) & 0xFFFF) as u32;
                    state.shared.width.store(width, Ordering::Relaxed);
                    state.shared.height.store(height, Ordering::Relaxed);
                    let mut rect = ViewRect {
                        left: 0,
                        top: 0,
                        right: width as i32,
                        bottom: height as i32,
                    };
                    state.view.onSize(&mut rect);
                }
                0
            }
            WM_CLOSE => {
                // Detach the view while the window still exists.
                if let Some(state) = window_state(hwnd) {
                    state.view.removed();
                    state.view.setFrame(null_mut());
                }
                DestroyWindow(hwnd);
                0
            }
            WM_DESTROY => {
                let ptr = SetWindowLongPtrW(hwnd, GWLP_USERDATA, 0) as *mut WindowState;
                if !ptr.is_null() {
                    drop(Box::from_raw(ptr));
                }
                PostQuitMessage(0);
                0
            }
            _ => DefWindowProcW(hwnd, msg, wparam, lparam),
        }
    }
}
