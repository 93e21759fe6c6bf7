//! Worker-side process chores (§4.8) that don't belong on `Master` itself.
//! The actual per-worker signal handling lives on `weir_net::SignalFlags`
//! (the worker's event loop and signal registration are the same reactor
//! tick), not here.

/// Drops privileges to the given user/group, in the order `setgid` →
/// `initgroups` → `setuid` (§4.8 "Privilege drop"). Failure is logged, not
/// fatal, matching the source's tolerance for a misconfigured drop target.
pub fn drop_privileges(user: Option<&str>, group: Option<&str>) {
    use std::ffi::CString;

    let Some(user) = user else { return };
    let Ok(user_c) = CString::new(user) else {
        tracing::warn!(user, "invalid user name for privilege drop");
        return;
    };

    unsafe {
        let pwd = libc::getpwnam(user_c.as_ptr());
        if pwd.is_null() {
            tracing::warn!(user, "unknown user, skipping privilege drop");
            return;
        }
        let (uid, mut gid) = ((*pwd).pw_uid, (*pwd).pw_gid);

        if let Some(group) = group {
            if let Ok(group_c) = CString::new(group) {
                let grp = libc::getgrnam(group_c.as_ptr());
                if !grp.is_null() {
                    gid = (*grp).gr_gid;
                }
            }
        }

        if libc::setgid(gid) != 0 {
            tracing::warn!("setgid({gid}) failed: {}", std::io::Error::last_os_error());
            return;
        }
        if libc::initgroups(user_c.as_ptr(), gid) != 0 {
            tracing::warn!("initgroups failed: {}", std::io::Error::last_os_error());
        }
        if libc::setuid(uid) != 0 {
            tracing::warn!("setuid({uid}) failed: {}", std::io::Error::last_os_error());
        }
    }
}
