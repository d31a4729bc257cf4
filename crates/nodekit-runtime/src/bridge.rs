//! Host-native bridge functions.
//!
//! Everything the guest cannot do itself (strong randomness, wall-clock
//! time, the virtual filesystem, timer scheduling, console output) is
//! exposed on a single frozen `__host` global under double-underscore
//! names. Built-in façades call these; guest code never reaches a host
//! function by an unprefixed name. Failures are logged host-side and
//! re-thrown into the guest as ordinary errors.

use boa_engine::object::builtins::JsArray;
use boa_engine::object::ObjectInitializer;
use boa_engine::property::Attribute;
use boa_engine::{
    js_string, Context, JsArgs, JsError, JsNativeError, JsObject, JsResult, JsString, JsValue,
    NativeFunction,
};
use boa_gc::{Finalize, Trace};
use data_encoding::HEXLOWER;
use hmac::{Hmac, Mac};
use md5::Md5;
use rand::rngs::OsRng;
use rand::RngCore;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512};

use nodekit_vfs::FsError;

use crate::error::GuestErrorKind;
use crate::host::{HostHandle, HostState};
use crate::loader;

/// Marker property on the opaque error thrown by `process.exit`.
pub const EXIT_MARKER: &str = "__nodekitExit";

type NativeFn = fn(&HostHandle, &JsValue, &[JsValue], &mut Context) -> JsResult<JsValue>;

#[derive(Trace, Finalize)]
struct BridgeCaptures {
    host: HostHandle,
    #[unsafe_ignore_trace]
    f: NativeFn,
}

fn native(host: &HostHandle, f: NativeFn) -> NativeFunction {
    NativeFunction::from_copy_closure_with_captures(
        |this, args, captures: &BridgeCaptures, ctx| (captures.f)(&captures.host, this, args, ctx),
        BridgeCaptures {
            host: host.clone(),
            f,
        },
    )
}

/// Build the `__host` object, install it as a global, and return it.
/// The bootstrap script adds its own guest-side helpers (`__fireTimer`)
/// and then freezes the object.
pub fn install(host: &HostHandle, context: &mut Context) -> JsResult<JsObject> {
    let obj = ObjectInitializer::new(context)
        .function(native(host, console_write), js_string!("__consoleWrite"), 1)
        .function(native(host, timer_schedule), js_string!("__timerSchedule"), 2)
        .function(native(host, timer_cancel), js_string!("__timerCancel"), 1)
        .function(native(host, now_ms), js_string!("__nowMs"), 0)
        .function(native(host, start_ms), js_string!("__startMs"), 0)
        .function(native(host, random_bytes), js_string!("__randomBytes"), 1)
        .function(native(host, random_uuid), js_string!("__randomUUID"), 0)
        .function(native(host, hash_hex), js_string!("__hashHex"), 2)
        .function(native(host, hmac_hex), js_string!("__hmacHex"), 3)
        .function(native(host, fs_read_hex), js_string!("__fsReadHex"), 1)
        .function(native(host, fs_write_hex), js_string!("__fsWriteHex"), 2)
        .function(native(host, fs_append_hex), js_string!("__fsAppendHex"), 2)
        .function(native(host, fs_exists), js_string!("__fsExists"), 1)
        .function(native(host, fs_stat), js_string!("__fsStat"), 1)
        .function(native(host, fs_mkdir), js_string!("__fsMkdir"), 2)
        .function(native(host, fs_readdir), js_string!("__fsReaddir"), 1)
        .function(native(host, fs_unlink), js_string!("__fsUnlink"), 1)
        .function(native(host, fs_rmdir), js_string!("__fsRmdir"), 2)
        .function(native(host, fs_rename), js_string!("__fsRename"), 2)
        .function(native(host, cwd), js_string!("__cwd"), 0)
        .function(native(host, argv), js_string!("__argv"), 0)
        .function(native(host, env), js_string!("__env"), 0)
        .function(native(host, exit), js_string!("__exit"), 1)
        .function(native(host, require_cjs), js_string!("__requireCjs"), 2)
        .build();

    context.register_global_property(js_string!("__host"), obj.clone(), Attribute::empty())?;
    Ok(obj)
}

// ---- helpers ---------------------------------------------------------------

fn arg_string(args: &[JsValue], index: usize, context: &mut Context) -> JsResult<String> {
    Ok(args
        .get_or_undefined(index)
        .to_string(context)?
        .to_std_string_escaped())
}

fn arg_u64(args: &[JsValue], index: usize, context: &mut Context) -> JsResult<u64> {
    let n = args.get_or_undefined(index).to_number(context)?;
    if n.is_finite() && n > 0.0 {
        Ok(n as u64)
    } else {
        Ok(0)
    }
}

/// Convert a VFS failure into a guest-visible error: logged host-side
/// for diagnostics, thrown into the guest under the
/// [`GuestErrorKind::HostBridge`] taxonomy name.
fn fs_err(err: FsError, context: &mut Context) -> JsError {
    log::warn!("fs bridge error: {}", err);
    let js_err: JsError = JsNativeError::error().with_message(err.to_string()).into();
    let opaque = js_err.to_opaque(context);
    if let Some(obj) = opaque.as_object() {
        let _ = obj.set(
            js_string!("name"),
            JsString::from(GuestErrorKind::HostBridge.name()),
            false,
            context,
        );
    }
    JsError::from_opaque(opaque)
}

fn decode_hex(input: &str, what: &str) -> JsResult<Vec<u8>> {
    HEXLOWER.decode(input.as_bytes()).map_err(|_| {
        JsNativeError::typ()
            .with_message(format!("invalid hex {}", what))
            .into()
    })
}

// ---- console ---------------------------------------------------------------

fn console_write(
    host: &HostHandle,
    _this: &JsValue,
    args: &[JsValue],
    context: &mut Context,
) -> JsResult<JsValue> {
    let line = arg_string(args, 0, context)?;
    HostState::push_log(host.raw(), line);
    Ok(JsValue::undefined())
}

// ---- timers and time -------------------------------------------------------

fn timer_schedule(
    host: &HostHandle,
    _this: &JsValue,
    args: &[JsValue],
    context: &mut Context,
) -> JsResult<JsValue> {
    let delay = arg_u64(args, 0, context)?;
    let is_interval = args.get_or_undefined(1).to_boolean();
    let mut state = host.state_mut();
    let now = state.clock_ms;
    let interval = is_interval.then(|| delay.max(1));
    let id = state.timers.schedule(now, delay, interval);
    Ok(JsValue::from(id as f64))
}

fn timer_cancel(
    host: &HostHandle,
    _this: &JsValue,
    args: &[JsValue],
    context: &mut Context,
) -> JsResult<JsValue> {
    let id = arg_u64(args, 0, context)?;
    host.state_mut().timers.cancel(id);
    Ok(JsValue::undefined())
}

fn now_ms(
    host: &HostHandle,
    _this: &JsValue,
    _args: &[JsValue],
    _context: &mut Context,
) -> JsResult<JsValue> {
    Ok(JsValue::from(host.state().now_ms()))
}

fn start_ms(
    host: &HostHandle,
    _this: &JsValue,
    _args: &[JsValue],
    _context: &mut Context,
) -> JsResult<JsValue> {
    Ok(JsValue::from(host.state().epoch_ms))
}

// ---- crypto ----------------------------------------------------------------

const MAX_RANDOM_BYTES: u64 = 65_536;

fn random_bytes(
    host: &HostHandle,
    _this: &JsValue,
    args: &[JsValue],
    context: &mut Context,
) -> JsResult<JsValue> {
    let _ = host;
    let len = arg_u64(args, 0, context)?;
    if len > MAX_RANDOM_BYTES {
        return Err(JsNativeError::range()
            .with_message(format!("requested {} random bytes, max is {}", len, MAX_RANDOM_BYTES))
            .into());
    }
    let mut bytes = vec![0u8; len as usize];
    OsRng.fill_bytes(&mut bytes);
    Ok(JsValue::from(JsString::from(HEXLOWER.encode(&bytes).as_str())))
}

fn random_uuid(
    host: &HostHandle,
    _this: &JsValue,
    _args: &[JsValue],
    _context: &mut Context,
) -> JsResult<JsValue> {
    let _ = host;
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    // RFC 4122 version 4, variant 10.
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;
    let hex = HEXLOWER.encode(&bytes);
    let uuid = format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    );
    Ok(JsValue::from(JsString::from(uuid.as_str())))
}

fn digest_hex(algorithm: &str, data: &[u8]) -> Option<String> {
    let digest = match algorithm {
        "md5" => Md5::digest(data).to_vec(),
        "sha1" => Sha1::digest(data).to_vec(),
        "sha256" => Sha256::digest(data).to_vec(),
        "sha384" => Sha384::digest(data).to_vec(),
        "sha512" => Sha512::digest(data).to_vec(),
        _ => return None,
    };
    Some(HEXLOWER.encode(&digest))
}

fn hmac_digest_hex(algorithm: &str, key: &[u8], data: &[u8]) -> Option<String> {
    let digest = match algorithm {
        "md5" => {
            let mut mac = Hmac::<Md5>::new_from_slice(key).ok()?;
            mac.update(data);
            mac.finalize().into_bytes().to_vec()
        }
        "sha1" => {
            let mut mac = Hmac::<Sha1>::new_from_slice(key).ok()?;
            mac.update(data);
            mac.finalize().into_bytes().to_vec()
        }
        "sha256" => {
            let mut mac = Hmac::<Sha256>::new_from_slice(key).ok()?;
            mac.update(data);
            mac.finalize().into_bytes().to_vec()
        }
        "sha384" => {
            let mut mac = Hmac::<Sha384>::new_from_slice(key).ok()?;
            mac.update(data);
            mac.finalize().into_bytes().to_vec()
        }
        "sha512" => {
            let mut mac = Hmac::<Sha512>::new_from_slice(key).ok()?;
            mac.update(data);
            mac.finalize().into_bytes().to_vec()
        }
        _ => return None,
    };
    Some(HEXLOWER.encode(&digest))
}

fn hash_hex(
    _host: &HostHandle,
    _this: &JsValue,
    args: &[JsValue],
    context: &mut Context,
) -> JsResult<JsValue> {
    let algorithm = arg_string(args, 0, context)?;
    let data = decode_hex(&arg_string(args, 1, context)?, "data")?;
    match digest_hex(&algorithm, &data) {
        Some(hex) => Ok(JsValue::from(JsString::from(hex.as_str()))),
        None => Err(JsNativeError::typ()
            .with_message(format!("unsupported digest algorithm '{}'", algorithm))
            .into()),
    }
}

fn hmac_hex(
    _host: &HostHandle,
    _this: &JsValue,
    args: &[JsValue],
    context: &mut Context,
) -> JsResult<JsValue> {
    let algorithm = arg_string(args, 0, context)?;
    let key = decode_hex(&arg_string(args, 1, context)?, "key")?;
    let data = decode_hex(&arg_string(args, 2, context)?, "data")?;
    match hmac_digest_hex(&algorithm, &key, &data) {
        Some(hex) => Ok(JsValue::from(JsString::from(hex.as_str()))),
        None => Err(JsNativeError::typ()
            .with_message(format!("unsupported digest algorithm '{}'", algorithm))
            .into()),
    }
}

// ---- filesystem ------------------------------------------------------------

fn fs_read_hex(
    host: &HostHandle,
    _this: &JsValue,
    args: &[JsValue],
    context: &mut Context,
) -> JsResult<JsValue> {
    let path = arg_string(args, 0, context)?;
    let data = host.state().fs.read_file(&path).map_err(|err| fs_err(err, context))?;
    Ok(JsValue::from(JsString::from(HEXLOWER.encode(&data).as_str())))
}

fn fs_write_hex(
    host: &HostHandle,
    _this: &JsValue,
    args: &[JsValue],
    context: &mut Context,
) -> JsResult<JsValue> {
    let path = arg_string(args, 0, context)?;
    let data = decode_hex(&arg_string(args, 1, context)?, "file data")?;
    host.state().fs.write_file(&path, data).map_err(|err| fs_err(err, context))?;
    Ok(JsValue::undefined())
}

fn fs_append_hex(
    host: &HostHandle,
    _this: &JsValue,
    args: &[JsValue],
    context: &mut Context,
) -> JsResult<JsValue> {
    let path = arg_string(args, 0, context)?;
    let data = decode_hex(&arg_string(args, 1, context)?, "file data")?;
    host.state().fs.append_file(&path, data).map_err(|err| fs_err(err, context))?;
    Ok(JsValue::undefined())
}

fn fs_exists(
    host: &HostHandle,
    _this: &JsValue,
    args: &[JsValue],
    context: &mut Context,
) -> JsResult<JsValue> {
    let path = arg_string(args, 0, context)?;
    Ok(JsValue::from(host.state().fs.exists(&path)))
}

fn fs_stat(
    host: &HostHandle,
    _this: &JsValue,
    args: &[JsValue],
    context: &mut Context,
) -> JsResult<JsValue> {
    let path = arg_string(args, 0, context)?;
    let (meta, now) = {
        let state = host.state();
        (state.fs.metadata(&path).map_err(|err| fs_err(err, context))?, state.now_ms())
    };
    let obj = ObjectInitializer::new(context)
        .property(js_string!("isFile"), meta.is_file(), Attribute::all())
        .property(js_string!("isDirectory"), meta.is_dir(), Attribute::all())
        .property(js_string!("size"), meta.len as f64, Attribute::all())
        .property(js_string!("mtimeMs"), now, Attribute::all())
        .build();
    Ok(JsValue::from(obj))
}

fn fs_mkdir(
    host: &HostHandle,
    _this: &JsValue,
    args: &[JsValue],
    context: &mut Context,
) -> JsResult<JsValue> {
    let path = arg_string(args, 0, context)?;
    let recursive = args.get_or_undefined(1).to_boolean();
    let state = host.state();
    if recursive {
        state.fs.create_dir_all(&path).map_err(|err| fs_err(err, context))?;
    } else {
        state.fs.create_dir(&path).map_err(|err| fs_err(err, context))?;
    }
    Ok(JsValue::undefined())
}

fn fs_readdir(
    host: &HostHandle,
    _this: &JsValue,
    args: &[JsValue],
    context: &mut Context,
) -> JsResult<JsValue> {
    let path = arg_string(args, 0, context)?;
    let names = host.state().fs.read_dir(&path).map_err(|err| fs_err(err, context))?;
    let values = names
        .into_iter()
        .map(|name| JsValue::from(JsString::from(name.as_str())));
    let array = JsArray::from_iter(values, context);
    Ok(JsValue::from(array))
}

fn fs_unlink(
    host: &HostHandle,
    _this: &JsValue,
    args: &[JsValue],
    context: &mut Context,
) -> JsResult<JsValue> {
    let path = arg_string(args, 0, context)?;
    host.state().fs.remove_file(&path).map_err(|err| fs_err(err, context))?;
    Ok(JsValue::undefined())
}

fn fs_rmdir(
    host: &HostHandle,
    _this: &JsValue,
    args: &[JsValue],
    context: &mut Context,
) -> JsResult<JsValue> {
    let path = arg_string(args, 0, context)?;
    let recursive = args.get_or_undefined(1).to_boolean();
    let state = host.state();
    if recursive {
        state.fs.remove_dir_all(&path).map_err(|err| fs_err(err, context))?;
    } else {
        state.fs.remove_dir(&path).map_err(|err| fs_err(err, context))?;
    }
    Ok(JsValue::undefined())
}

fn fs_rename(
    host: &HostHandle,
    _this: &JsValue,
    args: &[JsValue],
    context: &mut Context,
) -> JsResult<JsValue> {
    let from = arg_string(args, 0, context)?;
    let to = arg_string(args, 1, context)?;
    host.state().fs.rename(&from, &to).map_err(|err| fs_err(err, context))?;
    Ok(JsValue::undefined())
}

// ---- process ---------------------------------------------------------------

fn cwd(
    host: &HostHandle,
    _this: &JsValue,
    _args: &[JsValue],
    _context: &mut Context,
) -> JsResult<JsValue> {
    let cwd = host.state().options.cwd.clone();
    Ok(JsValue::from(JsString::from(cwd.as_str())))
}

fn argv(
    host: &HostHandle,
    _this: &JsValue,
    _args: &[JsValue],
    context: &mut Context,
) -> JsResult<JsValue> {
    let argv: Vec<String> = host
        .state()
        .call
        .as_ref()
        .map(|call| call.argv.clone())
        .unwrap_or_default();
    let values = argv
        .into_iter()
        .map(|arg| JsValue::from(JsString::from(arg.as_str())));
    let array = JsArray::from_iter(values, context);
    Ok(JsValue::from(array))
}

fn env(
    host: &HostHandle,
    _this: &JsValue,
    _args: &[JsValue],
    context: &mut Context,
) -> JsResult<JsValue> {
    let pairs = host.state().options.env.clone();
    let mut builder = ObjectInitializer::new(context);
    for (key, value) in &pairs {
        builder.property(
            JsString::from(key.as_str()),
            JsString::from(value.as_str()),
            Attribute::all(),
        );
    }
    Ok(JsValue::from(builder.build()))
}

fn exit(
    host: &HostHandle,
    _this: &JsValue,
    args: &[JsValue],
    context: &mut Context,
) -> JsResult<JsValue> {
    let code = args.get_or_undefined(0).to_number(context)? as i32;
    host.state_mut().exit_code = Some(code);
    // Unwind the guest stack with a marker error the session recognizes.
    let marker = ObjectInitializer::new(context)
        .property(JsString::from(EXIT_MARKER), code, Attribute::all())
        .build();
    Err(JsError::from_opaque(JsValue::from(marker)))
}

// ---- modules ---------------------------------------------------------------

fn require_cjs(
    host: &HostHandle,
    _this: &JsValue,
    args: &[JsValue],
    context: &mut Context,
) -> JsResult<JsValue> {
    let specifier = arg_string(args, 0, context)?;
    let from_dir = if args.get_or_undefined(1).is_undefined() {
        host.state().options.cwd.clone()
    } else {
        arg_string(args, 1, context)?
    };
    loader::require(host, context, &specifier, &from_dir, "<host>")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digests_are_deterministic() {
        assert_eq!(
            digest_hex("md5", b"abc").unwrap(),
            "900150983cd24fb0d6963f7d28e17f72"
        );
        assert_eq!(
            digest_hex("sha1", b"abc").unwrap(),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
        assert_eq!(
            digest_hex("sha256", b"abc").unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert!(digest_hex("crc32", b"abc").is_none());
    }

    #[test]
    fn test_hmac_sha256_vector() {
        // RFC 4231 test case 2.
        assert_eq!(
            hmac_digest_hex("sha256", b"Jefe", b"what do ya want for nothing?").unwrap(),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }
}
