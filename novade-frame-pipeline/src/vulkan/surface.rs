//! Presentation surface creation, delegated to the windowing side.

use ash::prelude::VkResult;
use ash::vk;
use std::ffi::CStr;

/// Creates the one presentable surface the renderer draws to.
///
/// Implemented by the windowing collaborator, which owns the native window.
pub trait SurfaceProvider {
    /// Platform instance extensions needed besides `VK_KHR_surface`.
    fn instance_extensions(&self) -> Vec<&'static CStr>;

    /// Creates the surface on `instance`. The caller destroys it.
    fn create_surface(&self, entry: &ash::Entry, instance: &ash::Instance) -> VkResult<vk::SurfaceKHR>;
}

#[cfg(feature = "wayland")]
pub use wayland::WaylandSurfaceProvider;

#[cfg(feature = "wayland")]
mod wayland {
    use super::SurfaceProvider;
    use ash::extensions::khr::WaylandSurface;
    use ash::prelude::VkResult;
    use ash::vk;
    use std::ffi::{c_void, CStr};
    use tracing::info;

    /// A surface for a `wl_surface` on a `wl_display`.
    pub struct WaylandSurfaceProvider {
        display: *mut c_void,
        surface: *mut c_void,
    }

    impl WaylandSurfaceProvider {
        /// # Safety
        ///
        /// `display` and `surface` must be valid `wl_display` / `wl_surface`
        /// pointers that outlive the renderer.
        pub unsafe fn new(display: *mut c_void, surface: *mut c_void) -> Self {
            Self { display, surface }
        }
    }

    impl SurfaceProvider for WaylandSurfaceProvider {
        fn instance_extensions(&self) -> Vec<&'static CStr> {
            vec![WaylandSurface::name()]
        }

        fn create_surface(&self, entry: &ash::Entry, instance: &ash::Instance) -> VkResult<vk::SurfaceKHR> {
            if self.display.is_null() || self.surface.is_null() {
                return Err(vk::Result::ERROR_INITIALIZATION_FAILED);
            }
            let wayland_surface_loader = WaylandSurface::new(entry, instance);
            let create_info = vk::WaylandSurfaceCreateInfoKHR::builder()
                .display(self.display)
                .surface(self.surface);
            let surface = unsafe { wayland_surface_loader.create_wayland_surface(&create_info, None)? };
            info!("Vulkan Wayland surface created successfully.");
            Ok(surface)
        }
    }

}
