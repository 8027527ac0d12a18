/// Lua script for the fixed-window decision.
///
/// KEYS\[1\] = window counter key
/// ARGV\[1\] = scaled limit
/// ARGV\[2\] = window length in seconds
/// ARGV\[3\] = window end as an epoch second
/// ARGV\[4\] = scaled cost
///
/// Returns `{allowed, scaled_remaining, retry_after_ms}`.
///
/// The counter expires at the true window boundary, not relative to the
/// insertion moment, so nodes that first touch the window at different times
/// still agree on when it ends. A denied request still increments the
/// counter; retry is the time to the boundary.
pub const FIXED_WINDOW: &str = r"
local limit = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local window_end = tonumber(ARGV[3])
local cost = tonumber(ARGV[4])

local current = redis.call('INCRBY', KEYS[1], cost)
if current == cost then
    redis.call('EXPIREAT', KEYS[1], window_end)
end
local ttl = redis.call('TTL', KEYS[1])
if ttl < 0 then
    redis.call('EXPIREAT', KEYS[1], window_end)
    ttl = window
end

local allowed = 0
if current <= limit then
    allowed = 1
end
local remaining = limit - current
if remaining < 0 then
    remaining = 0
end
return {allowed, remaining, ttl * 1000}
";

/// Lua script for the token-bucket decision.
///
/// KEYS\[1\] = bucket hash key (fields `tokens`, `last_refill_ms`)
/// ARGV\[1\] = scaled capacity
/// ARGV\[2\] = window length in seconds
/// ARGV\[3\] = current store time in epoch milliseconds
/// ARGV\[4\] = scaled cost
///
/// Returns `{allowed, scaled_tokens, retry_after_ms}`.
///
/// A missing key means a full bucket. Refill runs in the millisecond domain
/// with the division last; a per-second rate would truncate to zero below
/// one token per second and starve the bucket. A deny writes nothing, so
/// fractional refill credit keeps accruing against the stored
/// `last_refill_ms` instead of being floored away on every probe.
pub const TOKEN_BUCKET: &str = r"
local capacity = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local now_ms = tonumber(ARGV[3])
local cost = tonumber(ARGV[4])
local window_ms = window * 1000

local state = redis.call('HMGET', KEYS[1], 'tokens', 'last_refill_ms')
local tokens = tonumber(state[1])
local last_refill_ms = tonumber(state[2])
if tokens == nil or last_refill_ms == nil then
    tokens = capacity
    last_refill_ms = now_ms
end

local elapsed_ms = now_ms - last_refill_ms
if elapsed_ms < 0 then
    elapsed_ms = 0
end
local balance = tokens + math.floor((capacity * elapsed_ms) / window_ms)
if balance > capacity then
    balance = capacity
end

local allowed = 0
local remaining = balance
local retry_ms = 0
if balance >= cost then
    allowed = 1
    remaining = balance - cost
    redis.call('HSET', KEYS[1], 'tokens', remaining, 'last_refill_ms', now_ms)
else
    local needed = cost - tokens
    local credit_ms = elapsed_ms
    local max_credit_ms = math.floor(((capacity - tokens) * window_ms) / capacity)
    if credit_ms > max_credit_ms then
        credit_ms = max_credit_ms
    end
    retry_ms = math.floor((needed * window_ms + capacity - 1) / capacity) - credit_ms
end
redis.call('EXPIRE', KEYS[1], 2 * window + 60)
return {allowed, remaining, retry_ms}
";

/// Lua script for the sliding-window decision.
///
/// KEYS\[1\] = current window counter key
/// KEYS\[2\] = previous window counter key
/// ARGV\[1\] = scaled limit
/// ARGV\[2\] = window length in seconds
/// ARGV\[3\] = current store time as an epoch second
/// ARGV\[4\] = scaled cost
///
/// Returns `{allowed, scaled_remaining, retry_after_ms}`.
///
/// The previous window contributes `prev * (window - elapsed) / window`,
/// computed in thousandths so no float ever enters the comparison. On a
/// deny, retry is the earliest moment the decaying previous-window share has
/// dropped enough, clamped to `[1s, end of the current window]`.
pub const SLIDING_WINDOW: &str = r"
local limit = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local now = tonumber(ARGV[3])
local cost = tonumber(ARGV[4])

local cur = tonumber(redis.call('GET', KEYS[1])) or 0
local prev = tonumber(redis.call('GET', KEYS[2])) or 0

local elapsed = now % window
local remaining_in_window = window - elapsed
local prev_weight = math.floor((remaining_in_window * 1000) / window)
local weighted_prev = math.floor((prev * prev_weight) / 1000)
local weighted = cur + weighted_prev

local allowed = 0
local remaining = 0
local retry_ms = 0
if weighted + cost <= limit then
    allowed = 1
    cur = redis.call('INCRBY', KEYS[1], cost)
    redis.call('EXPIRE', KEYS[1], 2 * window)
    weighted = cur + weighted_prev
    remaining = limit - weighted
    if remaining < 0 then
        remaining = 0
    end
else
    remaining = limit - weighted
    if remaining < 0 then
        remaining = 0
    end
    local avail = limit - cost - cur
    if prev > 0 and avail >= 0 then
        local target_elapsed_ms = window * 1000 - math.floor((avail * window * 1000) / prev)
        retry_ms = target_elapsed_ms - elapsed * 1000
    else
        retry_ms = remaining_in_window * 1000
    end
    if retry_ms < 1000 then
        retry_ms = 1000
    end
    if retry_ms > remaining_in_window * 1000 then
        retry_ms = remaining_in_window * 1000
    end
end
return {allowed, remaining, retry_ms}
";
