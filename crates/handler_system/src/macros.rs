/// Exports a handler module's entry points for [`DylibLoader`](crate::DylibLoader).
///
/// `$register` is a function `fn(&mut ModuleRegistrar)` that declares the
/// module's handlers. This macro should be used once per `cdylib` crate.
///
/// ```ignore
/// use handler_system::{export_handler_module, ModuleRegistrar};
///
/// fn register(module: &mut ModuleRegistrar) {
///     module.handler("rndK", "handle_random_key", |session, _data| {
///         session.send(serde_json::json!({ "action": "rndK", "key": "a1b2c3d4" }));
///         Ok(())
///     });
/// }
///
/// export_handler_module!(register);
/// ```
///
/// This generates:
/// - `floe_handler_abi_version()` - the ABI version this module was built against
/// - `floe_register_handlers()` - runs `$register` with panics caught at the FFI boundary
#[macro_export]
macro_rules! export_handler_module {
    ($register:path) => {
        /// ABI version string, NUL terminated and `'static`.
        #[no_mangle]
        pub extern "C" fn floe_handler_abi_version() -> *const ::std::os::raw::c_char {
            $crate::HANDLER_ABI_VERSION_NUL.as_ptr() as *const ::std::os::raw::c_char
        }

        /// Registration entry point.
        ///
        /// # Safety
        ///
        /// `registrar` must be null or point to a live `ModuleRegistrar` that
        /// is not aliased for the duration of the call.
        #[no_mangle]
        pub unsafe extern "C" fn floe_register_handlers(registrar: *mut $crate::ModuleRegistrar) {
            if registrar.is_null() {
                return;
            }
            let registrar = unsafe { &mut *registrar };
            $crate::run_registration(registrar, $register);
        }
    };
}
