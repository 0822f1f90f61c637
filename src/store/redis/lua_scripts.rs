/// Lua script for fixed window counting
///
/// Increments the counter and sets its expiry only when the increment created
/// it, so later increments in the same window never extend the window.
///
/// KEYS[1] = the counter key
/// ARGV[1] = window duration (milliseconds)
///
/// Returns: the counter value after the increment
pub const INCREMENT_WITH_TTL_SCRIPT: &str = r#"
local key = KEYS[1]
local window_ms = tonumber(ARGV[1])

local current = redis.call('INCR', key)

-- Set expiry on first request
if current == 1 then
    redis.call('PEXPIRE', key, window_ms)
elseif redis.call('PTTL', key) == -1 then
    -- Counter outlived its expiry (e.g. created by an older writer), bound it now
    redis.call('PEXPIRE', key, window_ms)
end

return current
"#;

/// Lua script releasing a lock only for the holder that acquired it
///
/// KEYS[1] = the lock key
/// ARGV[1] = the holder token
///
/// Returns: 1 if the lock was released, 0 if it was not held by this token
pub const RELEASE_LOCK_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;
