//! Lua scripts for atomic job transitions.
//!
//! Every script takes the key prefix as `ARGV[1]` and derives keys the same
//! way as [`RedisKeys`](super::RedisKeys). Each job hash stores its ready-set
//! `score`, so promotion and reclaim never recompute it.

/// ARGV: prefix, id, queue, name, payload, priority, available_at, now, score.
/// Replaces any job with the same id.
pub(super) const PUSH: &str = r#"
local prefix, id, queue = ARGV[1], ARGV[2], ARGV[3]
local available_at, now = tonumber(ARGV[7]), tonumber(ARGV[8])
local job_key = prefix .. ':job:' .. id

local old = redis.call('HGET', job_key, 'queue')
if old then
    local base = prefix .. ':queue:' .. old
    redis.call('ZREM', base .. ':ready', id)
    redis.call('ZREM', base .. ':delayed', id)
    redis.call('ZREM', base .. ':reserved', id)
    redis.call('DEL', job_key)
end

redis.call('HSET', job_key,
    'id', id, 'queue', queue, 'name', ARGV[4], 'payload', ARGV[5],
    'priority', ARGV[6], 'attempts', 0, 'status', 'pending',
    'available_at', ARGV[7], 'created_at', ARGV[8], 'score', ARGV[9])
redis.call('SADD', prefix .. ':queues', queue)

local base = prefix .. ':queue:' .. queue
if available_at <= now then
    redis.call('ZADD', base .. ':ready', ARGV[9], id)
else
    redis.call('ZADD', base .. ':delayed', available_at, id)
end
return 1
"#;

/// ARGV: prefix, queue, now, reserved_until, limit.
/// Returns one flat HGETALL reply per reserved job.
pub(super) const POP: &str = r#"
local prefix, queue = ARGV[1], ARGV[2]
local now, limit = tonumber(ARGV[3]), tonumber(ARGV[5])
local base = prefix .. ':queue:' .. queue
local ready, delayed, reserved = base .. ':ready', base .. ':delayed', base .. ':reserved'

for _, id in ipairs(redis.call('ZRANGEBYSCORE', delayed, '-inf', now)) do
    redis.call('ZREM', delayed, id)
    local score = redis.call('HGET', prefix .. ':job:' .. id, 'score')
    if score then
        redis.call('ZADD', ready, score, id)
    end
end

for _, id in ipairs(redis.call('ZRANGEBYSCORE', reserved, '-inf', now)) do
    redis.call('ZREM', reserved, id)
    local job_key = prefix .. ':job:' .. id
    local score = redis.call('HGET', job_key, 'score')
    if score then
        redis.call('HINCRBY', job_key, 'attempts', 1)
        redis.call('HSET', job_key, 'status', 'pending')
        redis.call('ZADD', ready, score, id)
    end
end

local out = {}
for _, id in ipairs(redis.call('ZRANGE', ready, 0, limit - 1)) do
    redis.call('ZREM', ready, id)
    local job_key = prefix .. ':job:' .. id
    if redis.call('EXISTS', job_key) == 1 then
        redis.call('HSET', job_key, 'status', 'reserved', 'reserved_until', ARGV[4])
        redis.call('ZADD', reserved, ARGV[4], id)
        table.insert(out, redis.call('HGETALL', job_key))
    end
end
return out
"#;

/// ARGV: prefix, id, reserved_until.
/// Returns -1 if the job is missing, 0 if it is not leased, 1 on success.
pub(super) const MARK_PROCESSING: &str = r#"
local prefix, id = ARGV[1], ARGV[2]
local job_key = prefix .. ':job:' .. id
local status = redis.call('HGET', job_key, 'status')
if not status then
    return -1
end
if status ~= 'reserved' and status ~= 'processing' then
    return 0
end
local queue = redis.call('HGET', job_key, 'queue')
redis.call('HSET', job_key, 'status', 'processing', 'reserved_until', ARGV[3])
redis.call('ZADD', prefix .. ':queue:' .. queue .. ':reserved', ARGV[3], id)
return 1
"#;

/// ARGV: prefix, id, available_at, now.
/// Returns -1 if the job is missing, 0 if its lease is gone, 1 on success.
pub(super) const RELEASE: &str = r#"
local prefix, id = ARGV[1], ARGV[2]
local available_at, now = tonumber(ARGV[3]), tonumber(ARGV[4])
local job_key = prefix .. ':job:' .. id
local queue, status, until = unpack(redis.call('HMGET', job_key, 'queue', 'status', 'reserved_until'))
if not queue then
    return -1
end
if (status ~= 'reserved' and status ~= 'processing') or not until or tonumber(until) <= now then
    return 0
end

local base = prefix .. ':queue:' .. queue
redis.call('ZREM', base .. ':reserved', id)
redis.call('ZREM', base .. ':ready', id)
redis.call('ZREM', base .. ':delayed', id)
redis.call('HINCRBY', job_key, 'attempts', 1)
redis.call('HSET', job_key, 'status', 'pending', 'available_at', ARGV[3])
redis.call('HDEL', job_key, 'reserved_until')

if available_at <= now then
    redis.call('ZADD', base .. ':ready', redis.call('HGET', job_key, 'score'), id)
else
    redis.call('ZADD', base .. ':delayed', available_at, id)
end
return 1
"#;

/// ARGV: prefix, id, now. An empty `now` skips the lease deadline check.
/// Returns -1 if the job is missing, 0 if it is not leased, 1 on success.
pub(super) const DELETE: &str = r#"
local prefix, id, now = ARGV[1], ARGV[2], tonumber(ARGV[3])
local job_key = prefix .. ':job:' .. id
local queue, status, until = unpack(redis.call('HMGET', job_key, 'queue', 'status', 'reserved_until'))
if not queue then
    return -1
end
if status ~= 'reserved' and status ~= 'processing' then
    return 0
end
if now and (not until or tonumber(until) <= now) then
    return 0
end

local base = prefix .. ':queue:' .. queue
redis.call('ZREM', base .. ':ready', id)
redis.call('ZREM', base .. ':delayed', id)
redis.call('ZREM', base .. ':reserved', id)
redis.call('DEL', job_key)
return 1
"#;

/// ARGV: prefix, queue.
/// Returns -1 for an unregistered queue, else the number of jobs removed.
pub(super) const CLEAR: &str = r#"
local prefix, queue = ARGV[1], ARGV[2]
if redis.call('SISMEMBER', prefix .. ':queues', queue) == 0 then
    return -1
end

local base = prefix .. ':queue:' .. queue
local removed = 0
for _, kind in ipairs({'ready', 'delayed', 'reserved'}) do
    local set = base .. ':' .. kind
    for _, id in ipairs(redis.call('ZRANGE', set, 0, -1)) do
        removed = removed + redis.call('DEL', prefix .. ':job:' .. id)
    end
    redis.call('DEL', set)
end
return removed
"#;
