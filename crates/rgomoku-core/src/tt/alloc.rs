//! 置換表用のアラインメント付きメモリ確保
//!
//! Large Pages を優先して確保し、失敗時は通常ページへフォールバックする。
//! 確保自体の失敗は `None` で返し、テーブル側がサイズを半減して
//! リトライできるようにしてある。

use std::ptr::NonNull;

#[cfg(not(windows))]
use std::alloc::{alloc, dealloc, Layout};
#[cfg(not(windows))]
use std::cmp::max;

#[cfg(windows)]
use windows_sys::Win32::Foundation::{CloseHandle, GetLastError, ERROR_SUCCESS};
#[cfg(windows)]
use windows_sys::Win32::Security::{
    AdjustTokenPrivileges, LookupPrivilegeValueA, OpenProcessToken, LUID, LUID_AND_ATTRIBUTES,
    SE_PRIVILEGE_ENABLED, TOKEN_ADJUST_PRIVILEGES, TOKEN_PRIVILEGES, TOKEN_QUERY,
};
#[cfg(windows)]
use windows_sys::Win32::System::Memory::{
    GetLargePageMinimum, VirtualAlloc, VirtualFree, MEM_COMMIT, MEM_LARGE_PAGES, MEM_RELEASE,
    MEM_RESERVE, PAGE_READWRITE,
};
#[cfg(windows)]
use windows_sys::Win32::System::Threading::GetCurrentProcess;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum AllocKind {
    LargePages,
    /// Large Pages 確保失敗時、または未対応環境でのフォールバック
    #[allow(dead_code)]
    Regular,
}

pub(super) struct Allocation {
    ptr: NonNull<u8>,
    kind: AllocKind,
    #[cfg(not(windows))]
    layout: Layout,
}

impl Allocation {
    /// メモリを確保する。失敗時は `None`。
    pub(super) fn try_allocate(size: usize, alignment: usize) -> Option<Self> {
        debug_assert!(size > 0);

        #[cfg(windows)]
        {
            if let Some(alloc) = try_alloc_large_pages(size) {
                return Some(alloc);
            }
            alloc_windows(size)
        }

        #[cfg(not(windows))]
        {
            alloc_unix(size, alignment)
        }
    }

    pub(super) fn ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    pub(super) fn kind(&self) -> AllocKind {
        self.kind
    }
}

#[cfg(windows)]
fn align_up(value: usize, align: usize) -> usize {
    debug_assert!(value.checked_add(align - 1).is_some());
    (value + align - 1) / align * align
}

#[cfg(windows)]
fn try_alloc_large_pages(size: usize) -> Option<Allocation> {
    unsafe {
        let large_page_size = GetLargePageMinimum() as usize;
        if large_page_size == 0 {
            return None;
        }

        // SeLockMemoryPrivilege を一時的に有効化して確保を試みる
        let mut token = 0;
        if OpenProcessToken(GetCurrentProcess(), TOKEN_ADJUST_PRIVILEGES | TOKEN_QUERY, &mut token)
            == 0
        {
            return None;
        }

        let mut luid = LUID { LowPart: 0, HighPart: 0 };
        if LookupPrivilegeValueA(
            std::ptr::null(),
            b"SeLockMemoryPrivilege\0".as_ptr(),
            &mut luid,
        ) == 0
        {
            CloseHandle(token);
            return None;
        }

        let mut tp = TOKEN_PRIVILEGES {
            PrivilegeCount: 1,
            Privileges: [LUID_AND_ATTRIBUTES { Luid: luid, Attributes: SE_PRIVILEGE_ENABLED }],
        };
        let mut prev_tp = TOKEN_PRIVILEGES {
            PrivilegeCount: 0,
            Privileges: [LUID_AND_ATTRIBUTES {
                Luid: LUID { LowPart: 0, HighPart: 0 },
                Attributes: 0,
            }],
        };
        let mut prev_len = std::mem::size_of::<TOKEN_PRIVILEGES>() as u32;

        if AdjustTokenPrivileges(token, 0, &mut tp, prev_len, &mut prev_tp, &mut prev_len) == 0
            || GetLastError() != ERROR_SUCCESS
        {
            CloseHandle(token);
            return None;
        }

        let alloc_size = align_up(size, large_page_size);
        let ptr = VirtualAlloc(
            std::ptr::null_mut(),
            alloc_size,
            MEM_RESERVE | MEM_COMMIT | MEM_LARGE_PAGES,
            PAGE_READWRITE,
        );

        AdjustTokenPrivileges(
            token,
            0,
            &mut prev_tp,
            0,
            std::ptr::null_mut(),
            std::ptr::null_mut(),
        );
        CloseHandle(token);

        let ptr = NonNull::new(ptr as *mut u8)?;
        Some(Allocation { ptr, kind: AllocKind::LargePages })
    }
}

#[cfg(windows)]
fn alloc_windows(size: usize) -> Option<Allocation> {
    unsafe {
        let ptr =
            VirtualAlloc(std::ptr::null_mut(), size, MEM_RESERVE | MEM_COMMIT, PAGE_READWRITE);
        let ptr = NonNull::new(ptr as *mut u8)?;
        Some(Allocation { ptr, kind: AllocKind::Regular })
    }
}

#[cfg(not(windows))]
fn alloc_unix(size: usize, alignment: usize) -> Option<Allocation> {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    let (page_align, kind) = (2 * 1024 * 1024, AllocKind::LargePages);
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    let (page_align, kind) = (4096, AllocKind::Regular);

    let alignment = max(alignment, page_align);
    let layout = Layout::from_size_align(size, alignment).ok()?.pad_to_align();
    let ptr = NonNull::new(unsafe { alloc(layout) })?;

    #[cfg(any(target_os = "linux", target_os = "android"))]
    unsafe {
        // 失敗しても動作には影響しない
        let _ = libc::madvise(ptr.as_ptr() as *mut _, layout.size(), libc::MADV_HUGEPAGE);
    }

    Some(Allocation { ptr, kind, layout })
}

impl Drop for Allocation {
    fn drop(&mut self) {
        unsafe {
            #[cfg(windows)]
            {
                let ok = VirtualFree(self.ptr.as_ptr() as *mut _, 0, MEM_RELEASE);
                debug_assert!(ok != 0, "VirtualFree failed");
            }
            #[cfg(not(windows))]
            {
                dealloc(self.ptr.as_ptr(), self.layout);
            }
        }
    }
}

// SAFETY: Allocation は置換表の生メモリを所有するだけで、並行アクセスの
// 制御は上位層（アトミックなエントリと &mut の排他）が担う。
unsafe impl Send for Allocation {}
unsafe impl Sync for Allocation {}
